//! Device discovery with identity-based deduplication
//!
//! The platform radio stack emits found-device events with no ordering
//! or uniqueness guarantees. [`DiscoveryCoordinator`] owns the
//! subscription to that stream, dedups events by device identity, and
//! forwards each device to the caller exactly once.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::DiscoveryError;

/// Opaque stable address of a remote device. The dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device seen during the current scan
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub identity: DeviceIdentity,
    pub name: Option<String>,
    pub first_seen: DateTime<Utc>,
}

impl DiscoveredDevice {
    /// Human-readable label, falling back to the raw address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.identity.as_str())
    }
}

/// A raw found-device event as emitted by the radio stack
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    pub identity: DeviceIdentity,
    pub name: Option<String>,
}

/// Listener installed on the platform event stream
pub type DiscoveryListener = Box<dyn Fn(DiscoveryEvent) + Send + Sync>;

/// Callback invoked once per newly discovered device
pub type DeviceFoundCallback = Arc<dyn Fn(DiscoveredDevice) + Send + Sync>;

/// The platform's discovery broadcast, interface only
pub trait DiscoverySource: Send + Sync {
    /// Whether the underlying radio is powered and usable
    fn is_available(&self) -> bool {
        true
    }

    /// Start a scan and install `listener` on the event stream.
    ///
    /// The returned subscription is owned by the caller and must be
    /// unsubscribed to end the scan.
    fn subscribe(
        &self,
        listener: DiscoveryListener,
    ) -> Result<Box<dyn DiscoverySubscription>, DiscoveryError>;
}

/// Live subscription handle returned by [`DiscoverySource::subscribe`]
pub trait DiscoverySubscription: Send {
    /// End the scan. Implementations must tolerate a second call.
    fn unsubscribe(&mut self);
}

/// Wraps the discovery broadcast, dedups results, and exposes the
/// found-device set.
///
/// The set is written only from the discovery callback and read from
/// arbitrary caller threads, so it lives in a [`DashMap`].
pub struct DiscoveryCoordinator {
    source: Arc<dyn DiscoverySource>,
    subscription: Mutex<Option<Box<dyn DiscoverySubscription>>>,
    devices: Arc<DashMap<DeviceIdentity, DiscoveredDevice>>,
}

impl DiscoveryCoordinator {
    pub fn new(source: Arc<dyn DiscoverySource>) -> Self {
        Self {
            source,
            subscription: Mutex::new(None),
            devices: Arc::new(DashMap::new()),
        }
    }

    /// Whether a scan is currently active
    pub fn is_scanning(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Start scanning. A no-op while a scan is already active, so at
    /// most one subscription is ever live.
    pub fn start(&self, on_found: DeviceFoundCallback) -> Result<(), DiscoveryError> {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            debug!("discovery already scanning");
            return Ok(());
        }
        if !self.source.is_available() {
            return Err(DiscoveryError::TransportUnavailable);
        }

        let devices = Arc::clone(&self.devices);
        let listener: DiscoveryListener = Box::new(move |event| {
            if let Some(device) = record_if_new(&devices, event) {
                debug!(identity = %device.identity, "device found");
                on_found(device);
            }
        });

        *subscription = Some(self.source.subscribe(listener)?);
        info!("discovery started");
        Ok(())
    }

    /// Stop scanning. A no-op when idle.
    pub fn stop(&self) {
        match self.subscription.lock().take() {
            Some(mut subscription) => {
                subscription.unsubscribe();
                info!("discovery stopped");
            }
            None => debug!("discovery already idle"),
        }
    }

    /// Forget all discovered devices (used before a rescan)
    pub fn clear(&self) {
        self.devices.clear();
    }

    /// Snapshot of the discovered-device set
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.devices.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Inserts the event's device if its identity is unseen, returning the
/// stored entry for forwarding. An already-seen identity is never
/// re-added or re-emitted.
fn record_if_new(
    devices: &DashMap<DeviceIdentity, DiscoveredDevice>,
    event: DiscoveryEvent,
) -> Option<DiscoveredDevice> {
    match devices.entry(event.identity.clone()) {
        Entry::Occupied(_) => None,
        Entry::Vacant(slot) => {
            let device = DiscoveredDevice {
                identity: event.identity,
                name: event.name,
                first_seen: Utc::now(),
            };
            slot.insert(device.clone());
            Some(device)
        }
    }
}
