//! Serial-style link transport

pub mod connection;
pub mod manager;
pub mod tcp;
pub mod transport;

pub use connection::{Connection, ConnectionState};
pub use manager::ConnectionManager;
pub use transport::{ByteSink, ByteSource, LinkControl, LinkSocket, Transport};
