pub mod connection;
pub mod server;

pub use connection::HttpConnection;
pub use server::{ListenerConfig, Server, ServerBuilder, TlsConfig};
