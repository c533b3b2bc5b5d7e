pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod frame;
pub mod pool;
pub mod processor;
pub mod server;
