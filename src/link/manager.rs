//! Connection establishment with fallback channel selection
//!
//! The primary path opens a channel against the well-known serial
//! service identifier. Peers with broken or missing service records get
//! one best-effort retry on an explicit numbered channel; there is no
//! other automatic retry.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::constants::{FALLBACK_CHANNEL, SERIAL_SERVICE_UUID};
use crate::discovery::{DeviceIdentity, DiscoveryCoordinator};
use crate::error::ConnectError;
use crate::link::connection::{Connection, ConnectionState};
use crate::link::transport::{LinkControl, Transport};

/// Opens connections to chosen peers.
///
/// `connect` blocks for the duration of channel establishment, which
/// may take multiple seconds; never call it from a latency-sensitive
/// thread.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    discovery: Arc<DiscoveryCoordinator>,
    fallback_channel: u8,
    active: Mutex<Option<Arc<dyn LinkControl>>>,
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, discovery: Arc<DiscoveryCoordinator>) -> Self {
        Self {
            transport,
            discovery,
            fallback_channel: FALLBACK_CHANNEL,
            active: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub fn with_fallback_channel(mut self, channel: u8) -> Self {
        self.fallback_channel = channel;
        self
    }

    /// State of the last connect attempt. A link the peer has since
    /// torn down reads as Disconnected even though the connect itself
    /// succeeded.
    pub fn state(&self) -> ConnectionState {
        let state = *self.state.lock();
        if state == ConnectionState::Open {
            if let Some(control) = self.active.lock().as_ref() {
                if control.is_closed() {
                    return ConnectionState::Disconnected;
                }
            }
        }
        state
    }

    /// Open a stream channel to `peer`.
    ///
    /// Discovery is cancelled first: scanning and connecting compete
    /// for the same radio and degrade each other. The service-record
    /// open is tried once, the explicit-channel fallback once; both
    /// failing surfaces a single [`ConnectError::Failed`].
    pub fn connect(&self, peer: &DeviceIdentity) -> Result<Connection, ConnectError> {
        self.discovery.stop();

        let mut active = self.active.lock();
        if let Some(control) = active.as_ref() {
            if !control.is_closed() {
                return Err(ConnectError::AlreadyOpen);
            }
        }

        if !self.transport.is_available() {
            return Err(ConnectError::TransportUnavailable);
        }

        *self.state.lock() = ConnectionState::Connecting;
        info!(peer = %peer, service = %SERIAL_SERVICE_UUID, "opening link");
        let socket = match self.transport.open_service(peer, SERIAL_SERVICE_UUID) {
            Ok(socket) => socket,
            Err(primary) if primary.kind() == io::ErrorKind::PermissionDenied => {
                *self.state.lock() = ConnectionState::Failed;
                return Err(ConnectError::PermissionDenied(primary.to_string()));
            }
            Err(primary) => {
                warn!(
                    peer = %peer,
                    error = %primary,
                    "service connect failed; trying explicit channel {}",
                    self.fallback_channel
                );
                match self.transport.open_channel(peer, self.fallback_channel) {
                    Ok(socket) => socket,
                    Err(fallback) => {
                        error!(peer = %peer, error = %fallback, "fallback connect failed");
                        *self.state.lock() = ConnectionState::Failed;
                        return Err(ConnectError::Failed {
                            primary,
                            channel: self.fallback_channel,
                            fallback,
                        });
                    }
                }
            }
        };

        let connection = Connection::open(socket);
        *active = Some(connection.control());
        *self.state.lock() = ConnectionState::Open;
        info!(peer = %peer, "link open");
        Ok(connection)
    }
}
