//! Error types for the voice link

use std::io;

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Discovery subsystem errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Required permission not granted: {0}")]
    PermissionDenied(String),

    #[error("Radio is disabled or absent")]
    TransportUnavailable,

    #[error("Failed to subscribe to discovery events: {0}")]
    SubscribeFailed(String),
}

/// Connection establishment errors
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Required permission not granted: {0}")]
    PermissionDenied(String),

    #[error("Radio is disabled or absent")]
    TransportUnavailable,

    #[error("A connection is already open")]
    AlreadyOpen,

    #[error("Both connect attempts failed (service lookup: {primary}; channel {channel}: {fallback})")]
    Failed {
        primary: io::Error,
        channel: u8,
        fallback: io::Error,
    },
}

/// Faults inside an active capture or playback loop
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Audio device fault: {0}")]
    Device(String),

    #[error("Link I/O fault: {0}")]
    Link(#[from] io::Error),

    #[error("Connection is not open")]
    LinkClosed,

    #[error("Audio source already consumed; create a new session")]
    Consumed,
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session cannot start from state {0:?}")]
    InvalidState(SessionState),

    #[error("Audio routing failed: {0}")]
    Routing(String),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
