//! # Voicelink
//!
//! Walkie-talkie style two-way voice link between two devices over a
//! short-range serial channel.
//!
//! The crate is built around one duplex session per connection:
//!
//! ```text
//!   DiscoveryCoordinator ──(device chosen)──▶ ConnectionManager.connect
//!                                                   │
//!                                                   ▼
//!                              Connection (one serial-style socket)
//!                               │ output half          │ input half
//!                               ▼                      ▼
//!   microphone ──▶ AudioCaptureSource ──▶ link ──▶ AudioPlaybackSink ──▶ speaker
//!                  (capture thread)                 (playback thread)
//! ```
//!
//! [`session::DuplexSession`] owns the connection plus both loops and is
//! the only place that starts and stops them: start is all-or-nothing,
//! stop is idempotent and safe under concurrent triggers (user action,
//! loop fault, owner teardown).
//!
//! Platform primitives (radio, microphone, speaker, audio routing) are
//! abstracted behind traits in [`discovery`], [`link`], and [`audio`];
//! the crate ships a TCP-backed development transport and cpal-backed
//! audio devices so the demo binary runs on ordinary hosts.

pub mod audio;
pub mod config;
pub mod discovery;
pub mod error;
pub mod link;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;
    use uuid::Uuid;

    /// PCM sample rate used on both directions of the link
    pub const SAMPLE_RATE: u32 = 44_100;

    /// Mono audio in both directions
    pub const CHANNELS: u16 = 1;

    /// 16-bit signed samples
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Canonical serial-profile service identifier
    /// (`00001101-0000-1000-8000-00805F9B34FB`)
    pub const SERIAL_SERVICE_UUID: Uuid =
        Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB);

    /// Explicit channel tried once when service-record lookup fails
    pub const FALLBACK_CHANNEL: u8 = 1;

    /// Backoff after an empty capture read, to avoid busy-spinning
    pub const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_millis(10);

    /// How long `stop()` waits for a loop thread to exit before
    /// force-closing the underlying link to unblock it
    pub const STOP_GRACE: Duration = Duration::from_millis(500);
}
