use clap::Parser;
use lettercount::client;
use lettercount::config::{ClientArgs, ClientConfig};
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    // Logs go to stderr so that stdout carries nothing but the server response.
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let config = ClientConfig::from(ClientArgs::parse());

    tokio::select! {
        result = client::send_file(&config) => match result {
            Ok(response) => println!("{}", response),
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            println!("Finishing due to interrupt");
        }
    }
}
