use std::io;
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::string::FromUtf8Error;

use thiserror::Error as ThisError;
use tokio::fs::File;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::frame;

#[derive(Debug, ThisError)]
pub enum ClientError {
    #[error("unable to open {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is {size} bytes, more than a single frame can carry")]
    FileTooLarge { path: PathBuf, size: u64 },
    #[error("unable to connect to {address}: {source}")]
    Connect {
        address: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    #[error("unable to send data: {0}")]
    Send(#[source] frame::Error),
    #[error("unable to receive response from server: {0}")]
    Receive(#[source] frame::Error),
    #[error("response from server is not valid UTF-8: {0}")]
    InvalidResponse(#[source] FromUtf8Error),
}

/// Sends the configured file to the server as a single frame and returns the server's answer.
pub async fn send_file(config: &ClientConfig) -> Result<String, ClientError> {
    let open_error = |source| ClientError::OpenFile {
        path: config.file.clone(),
        source,
    };
    let file = File::open(&config.file).await.map_err(open_error)?;
    let size = file.metadata().await.map_err(open_error)?.len();

    if size > u32::MAX as u64 {
        return Err(ClientError::FileTooLarge {
            path: config.file.clone(),
            size,
        });
    }

    let address = SocketAddrV4::new(config.host, config.port);
    let stream = TcpStream::connect(address)
        .await
        .map_err(|source| ClientError::Connect { address, source })?;
    let mut conn = Connection::new(stream, &config.framing);
    info!(connection_id = %conn.id, "Connected to {}", address);

    debug!(bytes = size, "Sending {}", config.file.display());
    conn.write_frame_from_source(file, size)
        .await
        .map_err(ClientError::Send)?;

    let response = conn.read_frame().await.map_err(ClientError::Receive)?;
    debug!(bytes = response.len(), "Received response");

    String::from_utf8(response.into_payload().to_vec()).map_err(ClientError::InvalidResponse)
}
