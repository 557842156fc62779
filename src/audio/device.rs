//! Platform audio primitives, interface only
//!
//! The raw microphone, speaker, and routing drivers live outside this
//! crate; these traits describe the blocking primitives they must
//! expose. Frame buffer sizes are derived at runtime from the device's
//! minimum-latency requirement, never from a constant.

use std::io;

use crate::audio::frame::AudioFormat;

/// Local audio input (microphone) device
pub trait AudioInput: Send {
    /// Minimum-latency buffer requirement for `format`, in bytes
    fn min_buffer_size(&self, format: AudioFormat) -> usize;

    /// Arm the device for capture
    fn arm(&mut self) -> io::Result<()>;

    /// Blocking read, bounded by the device buffer latency.
    ///
    /// `Ok(0)` means no data was available this cycle; it is a
    /// transient condition, not end-of-capture.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the device. Idempotent.
    fn release(&mut self);
}

/// Local audio output (speaker) device
pub trait AudioOutput: Send {
    /// Minimum-latency buffer requirement for `format`, in bytes
    fn min_buffer_size(&self, format: AudioFormat) -> usize;

    /// Arm the device for playback
    fn arm(&mut self) -> io::Result<()>;

    /// Blocking write of one frame's worth of samples
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Release the device. Idempotent.
    fn release(&mut self);
}

/// System audio routing collaborator.
///
/// Told to route system audio to/from the wireless link for the
/// session duration; `restore` puts the prior route back.
pub trait AudioRouting: Send + Sync {
    fn route_to_link(&self) -> io::Result<()>;
    fn restore(&self);
}

/// No-op routing for hosts whose audio stack needs no rerouting
pub struct NullRouting;

impl AudioRouting for NullRouting {
    fn route_to_link(&self) -> io::Result<()> {
        Ok(())
    }

    fn restore(&self) {}
}
