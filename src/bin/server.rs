use clap::Parser;
use lettercount::config::{ServerArgs, ServerConfig};
use lettercount::server;
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let config = ServerConfig::from(ServerArgs::parse());

    if let Err(e) = server::run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
