//! Configuration for the server and client binaries.
//!
//! Values come from command-line arguments (with environment variable fallbacks for the tuning
//! knobs) and are turned into plain config structs handed to the codec, connection and server at
//! construction time.

use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default number of bytes read from or written to a stream at a time.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default number of connections handled concurrently by the server.
pub const DEFAULT_WORKERS: usize = 5;

/// Largest payload the 4-byte header can describe.
pub const DEFAULT_MAX_FRAME_SIZE: usize = u32::MAX as usize;

/// Default time, in seconds, a peer gets to deliver or accept a whole frame.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramingConfig {
    /// Upper bound for a single read or write on the stream.
    pub buffer_size: usize,
    /// Frames declaring a longer payload are rejected before it is read.
    pub max_frame_size: usize,
    /// Deadline for reading or writing one frame. `None` waits forever.
    pub io_timeout: Option<Duration>,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            io_timeout: Some(Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: Ipv4Addr,
    pub port: u16,
    pub workers: NonZeroUsize,
    pub framing: FramingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            port: 0,
            workers: NonZeroUsize::new(DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN),
            framing: FramingConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    pub file: PathBuf,
    pub framing: FramingConfig,
}

#[derive(clap::Args, Debug)]
pub struct FramingArgs {
    /// Number of bytes to read or write at a time
    #[arg(
        long,
        env = "LETTERCOUNT_BUFFER_SIZE",
        default_value_t = DEFAULT_BUFFER_SIZE,
        value_parser = positive_usize
    )]
    pub buffer_size: usize,

    /// Largest accepted frame payload, in bytes
    #[arg(
        long,
        env = "LETTERCOUNT_MAX_FRAME_SIZE",
        default_value_t = DEFAULT_MAX_FRAME_SIZE
    )]
    pub max_frame_size: usize,

    /// Seconds a peer gets to send or receive a whole frame, 0 to wait forever
    #[arg(
        long,
        env = "LETTERCOUNT_IO_TIMEOUT",
        default_value_t = DEFAULT_IO_TIMEOUT_SECS
    )]
    pub io_timeout: u64,
}

impl From<FramingArgs> for FramingConfig {
    fn from(args: FramingArgs) -> Self {
        Self {
            buffer_size: args.buffer_size,
            max_frame_size: args.max_frame_size,
            io_timeout: (args.io_timeout > 0).then(|| Duration::from_secs(args.io_timeout)),
        }
    }
}

/// Opens a socket on <port> and listens for client requests. Each request carries a file; the
/// count of lowercase and uppercase letters in it is sent back to the client.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ServerArgs {
    /// The port to listen on
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// The IPv4 address to bind to
    #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    pub address: Ipv4Addr,

    /// Number of connections handled concurrently
    #[arg(
        short,
        long,
        env = "LETTERCOUNT_WORKERS",
        default_value_t = NonZeroUsize::new(DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN)
    )]
    pub workers: NonZeroUsize,

    #[command(flatten)]
    pub framing: FramingArgs,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            address: args.address,
            port: args.port,
            workers: args.workers,
            framing: args.framing.into(),
        }
    }
}

/// Connects to the server at <host>:<port> and sends it a file. The server response is printed
/// to stdout.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ClientArgs {
    /// The server IPv4 address
    #[arg(long)]
    pub host: Ipv4Addr,

    /// The port the server is listening on
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Path to the file sent to the server for analysis
    #[arg(short, long, value_parser = existing_file)]
    pub file: PathBuf,

    #[command(flatten)]
    pub framing: FramingArgs,
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            file: args.file,
            framing: args.framing.into(),
        }
    }
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("file does not exist. Got {value}"))
    }
}

fn positive_usize(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a positive integer. Got {value}")),
    }
}
