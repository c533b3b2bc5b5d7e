use std::future::Future;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error as ThisError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error, info, instrument};

use crate::config::{FramingConfig, ServerConfig};
use crate::connection::Connection;
use crate::frame::{self, Frame};
use crate::pool::WorkerPool;
use crate::processor::{LetterCount, Processor};

const BACKLOG: u32 = 1024;

/// Pause after a failed accept. Errors such as EMFILE keep failing until a descriptor is freed,
/// retrying at once would spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, ThisError)]
pub enum ServerError {
    #[error("unable to create socket: {0}")]
    CreateSocket(#[source] io::Error),
    #[error("unable to bind socket to {address}: {source}")]
    Bind {
        address: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    #[error("unable to listen on socket: {0}")]
    Listen(#[source] io::Error),
    #[error("unable to accept client request: {0}")]
    Accept(#[source] io::Error),
}

impl ServerError {
    /// Whether the error should bring the whole server down. Everything that goes wrong while
    /// setting up the listening socket is fatal; a failed accept only affects that one client.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ServerError::Accept(_))
    }
}

/// An accepted connection waiting for a worker.
#[derive(Debug)]
pub struct Job {
    pub stream: TcpStream,
    pub client_address: SocketAddr,
}

pub struct Server {
    listener: TcpListener,
    workers: NonZeroUsize,
    framing: FramingConfig,
    processor: Arc<dyn Processor>,
}

impl Server {
    /// Creates, binds and starts listening on the server socket. Must be called from within a
    /// Tokio runtime.
    pub fn bind(config: &ServerConfig) -> Result<Server, ServerError> {
        let address = SocketAddrV4::new(config.address, config.port);

        let socket = TcpSocket::new_v4().map_err(ServerError::CreateSocket)?;
        socket
            .set_reuseaddr(true)
            .map_err(ServerError::CreateSocket)?;
        socket
            .bind(address.into())
            .map_err(|source| ServerError::Bind { address, source })?;
        let listener = socket.listen(BACKLOG).map_err(ServerError::Listen)?;

        Ok(Server {
            listener,
            workers: config.workers,
            framing: config.framing,
            processor: Arc::new(LetterCount),
        })
    }

    /// Replaces the payload processor, `LetterCount` by default.
    pub fn with_processor(mut self, processor: impl Processor) -> Server {
        self.processor = Arc::new(processor);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections and hands them to the worker pool until `shutdown` completes.
    ///
    /// On shutdown the listening socket is closed first; connections accepted before that,
    /// queued or in flight, are served to completion before this returns.
    pub async fn run(self, shutdown: impl Future) -> Result<(), ServerError> {
        let Server {
            listener,
            workers,
            framing,
            processor,
        } = self;

        let pool = WorkerPool::new(workers, move |job: Job| {
            let processor = processor.clone();
            async move { serve(job, framing, processor).await }
        });

        info!(
            "listening on {}",
            listener.local_addr().map_err(ServerError::Listen)?
        );

        tokio::pin!(shutdown);

        loop {
            let (stream, client_address) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = accept_with_backoff(|| listener.accept()) => accepted,
            };

            info!("Accepted a client connection from {}", client_address);
            if let Err(e) = pool.submit(Job {
                stream,
                client_address,
            }) {
                error!(error = %e, "Dropping connection from {}", client_address);
            }
        }

        info!("Closing socket");
        drop(listener);

        pool.shutdown().await;
        info!("All connections closed");

        Ok(())
    }
}

/// Retries `accept` until it yields a connection, logging each failure and pausing for
/// `ACCEPT_BACKOFF` in between.
async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                let e = ServerError::Accept(e);
                error!(error = %e, "Accept failed, waiting for the next client");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Binds the server described by `config` and serves until Ctrl-C is received.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let server = Server::bind(&config)?;

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Unable to listen for the interrupt signal");
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[instrument(
    name = "connection",
    skip(job, framing, processor),
    fields(connection_id, client_address = %job.client_address)
)]
async fn serve(job: Job, framing: FramingConfig, processor: Arc<dyn Processor>) {
    let conn = Connection::new(job.stream, &framing);
    tracing::Span::current().record("connection_id", conn.id.to_string());

    if let Err(e) = handle_connection(conn, processor.as_ref()).await {
        error!(error = %e, "There was an error in communication with the client");
    }
    info!("Closing connection with a client...");
}

/// Runs one request/response cycle: read a frame, process its payload, answer with a frame.
///
/// The connection is consumed and therefore closed on every path out of this function. An error
/// means the cycle was aborted and no response, or only part of one, was sent.
pub async fn handle_connection<S>(
    mut conn: Connection<S>,
    processor: &dyn Processor,
) -> Result<(), frame::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!("Receiving data...");
    let request = conn.read_frame().await?;
    debug!(bytes = request.len(), "Received frame from client");

    let response = processor.process(request.payload());

    info!("Sending response...");
    conn.write_frame(Frame::from(response)).await?;

    // The response is already flushed, the peer may simply have hung up first.
    if let Err(e) = conn.shutdown().await {
        debug!(error = %e, "Unable to shut down the connection cleanly");
    }

    Ok(())
}
