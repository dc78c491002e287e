//! # Notification Watcher
//!
//! Connects to a Kodi instance, prints the protocol version and logs every
//! notification until Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p kodi-jsonrpc-client --example notification-watcher -- --address 192.168.1.20:9090
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use kodi_jsonrpc_client::prelude::*;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "notification-watcher",
    about = "Stream Kodi notifications to the log"
)]
struct Args {
    /// Kodi JSON-RPC raw socket address (not the HTTP port)
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    address: String,

    /// Connect and handshake timeout in seconds (0 waits forever)
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Log level: debug, info, warn, error or fatal
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,

    /// Ping the server every N seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    ping_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level)?;

    let mut config = ConnectionConfig::with_address(&args.address);
    config.timeouts.connect = Duration::from_secs(args.timeout);
    config.logging.level = Some(args.log_level);

    let connection = ConnectionBuilder::new()
        .with_config(config)
        .connect()
        .await
        .with_context(|| format!("connecting to {}", args.address))?;
    info!(
        address = %connection.address(),
        version = %connection.server_version(),
        "Watching for notifications, press Ctrl-C to stop"
    );

    let mut notifications = Box::pin(connection.notifications().into_stream());
    let mut ping = tokio::time::interval(Duration::from_secs(args.ping_interval.max(1)));
    ping.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            notification = notifications.next() => {
                let Some(notification) = notification else {
                    warn!("Notification stream ended");
                    break;
                };
                info!(
                    method = %notification.method,
                    item_type = notification.item_type().unwrap_or("-"),
                    sender = notification.sender().unwrap_or("-"),
                    "Notification"
                );
            }
            _ = ping.tick(), if args.ping_interval > 0 => {
                match connection.send(JsonRpcRequest::new("JSONRPC.Ping"), true).await {
                    Ok(mut handle) => match handle.read_value(Duration::from_secs(5)).await {
                        Ok(pong) => info!(response = %pong, status = %connection.status().summary(), "Ping"),
                        Err(e) => warn!(error = %e, "Ping failed"),
                    },
                    Err(e) => warn!(error = %e, "Ping not sent"),
                }
            }
        }
    }

    connection.close().await;
    Ok(())
}
