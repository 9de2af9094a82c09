use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use serial_link::{discover_ports, ConnectionManager, LinkEvent, LinkOptions, LogSink, Parity, PortConfig, StopBits};

/// Keep a serial device connected, print what it sends, forward stdin to it.
#[derive(Parser, Debug)]
#[command(name = "serial-link", version, long_about = None)]
struct Args {
    /// Serial port to open (e.g. /dev/ttyUSB0 or COM3)
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value_t = 115200)]
    baud: u32,

    /// Parity: none, odd, even, mark, space
    #[arg(long, default_value = "none")]
    parity: Parity,

    /// Stop bits: 1, 1.5, 2
    #[arg(long, default_value = "1")]
    stop_bits: StopBits,

    /// JSON file with link timing options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available ports and exit
    #[arg(short, long, default_value_t = false)]
    list: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if args.list {
        for device in discover_ports().context("failed to enumerate serial ports")? {
            match (device.vid, device.pid) {
                (Some(vid), Some(pid)) => println!(
                    "{}\t{:04X}:{:04X}\t{}",
                    device.port_name,
                    vid,
                    pid,
                    device.product.unwrap_or_default()
                ),
                _ => println!("{}", device.port_name),
            }
        }
        return Ok(());
    }

    let port_name = args.port.context("a port name is required (or use --list)")?;
    let options = match &args.config {
        Some(path) => LinkOptions::from_json_file(path)
            .with_context(|| format!("failed to load options from {}", path.display()))?,
        None => LinkOptions::default(),
    };

    let port = PortConfig::new(port_name)
        .baud_rate(args.baud)
        .parity(args.parity)
        .stop_bits(args.stop_bits);

    let manager = ConnectionManager::builder(port)
        .options(options)
        .logger(LogSink::global().with_target("serial_link::link"))
        .build();
    let mut events = manager.subscribe();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LinkEvent::ConnectionStatusChanged(event)) => {
                    info!("{}", if event.connected { "Link up" } else { "Link down" });
                }
                Ok(LinkEvent::MessageReceived(message)) => {
                    println!("<< {} | {}", hex::encode(&message.data), String::from_utf8_lossy(&message.data).trim_end());
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Output fell behind; {} events dropped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if !manager.connect().await {
        warn!("Device not available yet; retrying in the background");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let mut payload = line.into_bytes();
                        payload.push(b'\n');
                        if !manager.send_message(&payload).await {
                            warn!("Not sent: link is down");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("stdin: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.disconnect().await;
    drop(manager);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(())
}
