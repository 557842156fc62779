//! One open connection to a peer

use std::sync::Arc;

use tracing::debug;

use crate::link::transport::{ByteSink, ByteSource, LinkControl, LinkSocket};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
    Failed,
}

/// An open stream channel to a peer.
///
/// The input and output halves may each be taken exactly once, and only
/// while the connection is `Open`; after [`Connection::close`] the
/// handles are gone for good. Closing force-closes the socket, so any
/// read or write still blocked on it returns promptly.
pub struct Connection {
    state: ConnectionState,
    input: Option<ByteSource>,
    output: Option<ByteSink>,
    control: Arc<dyn LinkControl>,
}

impl Connection {
    /// Wrap an already-open socket
    pub fn open(socket: Box<dyn LinkSocket>) -> Self {
        let (input, output, control) = socket.into_parts();
        Self {
            state: ConnectionState::Open,
            input: Some(input),
            output: Some(output),
            control,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Take the reading half. `None` once taken or no longer open.
    pub fn take_input(&mut self) -> Option<ByteSource> {
        if self.is_open() {
            self.input.take()
        } else {
            None
        }
    }

    /// Take the writing half. `None` once taken or no longer open.
    pub fn take_output(&mut self) -> Option<ByteSink> {
        if self.is_open() {
            self.output.take()
        } else {
            None
        }
    }

    pub fn control(&self) -> Arc<dyn LinkControl> {
        Arc::clone(&self.control)
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.control.close();
        self.input = None;
        self.output = None;
        self.state = ConnectionState::Closed;
        debug!("connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
