//! Audio subsystem: PCM frames, device traits, and the two relay loops

pub mod capture;
pub mod cpal_io;
pub mod device;
pub mod frame;
pub mod playback;

pub use capture::AudioCaptureSource;
pub use device::{AudioInput, AudioOutput, AudioRouting, NullRouting};
pub use frame::{AudioFormat, AudioFrame};
pub use playback::AudioPlaybackSink;

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::error;

use crate::error::StreamError;

/// Why a capture or playback loop ended on its own
#[derive(Debug)]
pub enum StreamEnd {
    /// The peer closed the stream (zero-length read)
    EndOfStream,
    /// I/O fault on the device or the link
    Fault(StreamError),
}

/// Invoked once when a loop terminates on its own, never on an
/// externally requested stop.
pub type EndCallback = Box<dyn FnOnce(StreamEnd) + Send>;

/// Join-side handle for a relay loop thread.
///
/// The worker thread holds the paired sender and drops it on exit, so
/// the receiver disconnecting is the exit signal. A timeout means the
/// thread is still blocked in I/O and the caller must escalate by
/// force-closing the resource it is blocked on.
pub(crate) struct LoopWorker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl LoopWorker {
    pub(crate) fn new(handle: JoinHandle<()>, done: Receiver<()>) -> Self {
        Self { handle, done }
    }

    /// Whether the calling thread is the loop thread itself
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.handle.thread().id()
    }

    /// Wait for the loop to exit, escalating once after `grace`, then
    /// join.
    pub(crate) fn reap(self, grace: Duration, escalate: impl FnOnce()) {
        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => escalate(),
        }
        if let Err(e) = self.handle.join() {
            error!("relay loop thread panicked: {e:?}");
        }
    }
}
