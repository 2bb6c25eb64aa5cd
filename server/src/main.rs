use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::{Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Simulation tick period in milliseconds
    #[arg(long, default_value = "16")]
    tick_ms: u64,

    /// Snapshot period in milliseconds
    #[arg(long, default_value = "33")]
    snapshot_ms: u64,

    /// Seconds a disconnected player is kept for resume (0 evicts immediately)
    #[arg(short, long, default_value = "60")]
    grace_secs: u64,

    /// Maximum concurrent connections, hosts included
    #[arg(short, long, default_value = "64")]
    max_connections: usize,

    /// Close connections silent for this many seconds (0 disables)
    #[arg(long, default_value = "30")]
    idle_timeout_secs: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            tick_period: Duration::from_millis(self.tick_ms),
            snapshot_period: Duration::from_millis(self.snapshot_ms),
            grace_period: Duration::from_secs(self.grace_secs),
            max_connections: self.max_connections,
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    info!("Starting server on {}", config.bind_addr);
    let mut server = Server::new(config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await?;

    Ok(())
}
