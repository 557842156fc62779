//! Microphone capture loop
//!
//! Reads PCM frames from the local input device on a dedicated thread
//! and forwards them to the link. The loop owns both the device and the
//! sink and releases them when it exits, whatever made it exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::audio::device::AudioInput;
use crate::audio::frame::{AudioFormat, AudioFrame};
use crate::audio::{EndCallback, LoopWorker, StreamEnd};
use crate::constants::{CAPTURE_RETRY_BACKOFF, STOP_GRACE};
use crate::error::StreamError;
use crate::link::transport::{ByteSink, LinkControl};

/// Continuously reads frames from the input device and forwards them
/// to a caller-supplied sink.
///
/// One capture source drives at most one session; after a stop it is
/// spent and a fresh source is needed.
pub struct AudioCaptureSource {
    format: AudioFormat,
    running: Arc<AtomicBool>,
    device: Mutex<Option<Box<dyn AudioInput>>>,
    worker: Mutex<Option<(LoopWorker, Arc<dyn LinkControl>)>>,
    retry_backoff: Duration,
    stop_grace: Duration,
}

impl AudioCaptureSource {
    pub fn new(device: Box<dyn AudioInput>, format: AudioFormat) -> Self {
        Self {
            format,
            running: Arc::new(AtomicBool::new(false)),
            device: Mutex::new(Some(device)),
            worker: Mutex::new(None),
            retry_backoff: CAPTURE_RETRY_BACKOFF,
            stop_grace: STOP_GRACE,
        }
    }

    pub fn with_timing(mut self, retry_backoff: Duration, stop_grace: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self.stop_grace = stop_grace;
        self
    }

    pub fn is_capturing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the capture loop. Idempotent: a second call while already
    /// running is a no-op.
    ///
    /// `on_end` fires only if the loop terminates on its own (an I/O
    /// fault on the device or the sink), never on an external stop.
    pub fn start_capturing(&self, sink: ByteSink, on_end: EndCallback) -> Result<(), StreamError> {
        let mut worker_slot = self.worker.lock();
        if self.running.load(Ordering::Acquire) {
            debug!("capture already running");
            return Ok(());
        }

        let mut device = self.device.lock().take().ok_or(StreamError::Consumed)?;
        device.arm().map_err(|e| StreamError::Device(e.to_string()))?;

        let frame_len = device
            .min_buffer_size(self.format)
            .max(self.format.bytes_per_sample());
        let running = Arc::clone(&self.running);
        let backoff = self.retry_backoff;
        let control = sink.control();
        let (done_tx, done_rx) = bounded::<()>(1);

        running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("voicelink-capture".to_string())
            .spawn(move || {
                let _done = done_tx;
                capture_loop(device, sink, running, frame_len, backoff, on_end);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                StreamError::Device(e.to_string())
            })?;

        *worker_slot = Some((LoopWorker::new(handle, done_rx), control));
        debug!(frame_len, "capture started");
        Ok(())
    }

    /// Stop the capture loop and wait for the thread to exit.
    /// Idempotent, and safe to call both from the loop thread itself
    /// and from external threads concurrently.
    ///
    /// The device read is bounded by device latency, but the loop can
    /// sit in a blocking link write indefinitely; after the grace
    /// period the link is force-closed to fault the write out.
    pub fn stop_capturing(&self) {
        self.running.store(false, Ordering::Release);

        let mut slot = self.worker.lock();
        let Some((worker, control)) = slot.take() else {
            debug!("capture already stopped");
            return;
        };
        if worker.is_current() {
            // The loop is stopping itself on a fault; it cannot join
            // its own thread. Leave the handle for an external reaper.
            *slot = Some((worker, control));
            return;
        }
        drop(slot);

        let grace = self.stop_grace;
        worker.reap(grace, || {
            warn!("capture thread still blocked after {grace:?}; closing link");
            control.close();
        });
        debug!("capture stopped");
    }
}

impl Drop for AudioCaptureSource {
    fn drop(&mut self) {
        self.stop_capturing();
    }
}

fn capture_loop(
    mut device: Box<dyn AudioInput>,
    mut sink: ByteSink,
    running: Arc<AtomicBool>,
    frame_len: usize,
    backoff: Duration,
    on_end: EndCallback,
) {
    let mut frame = AudioFrame::with_capacity(frame_len);
    let mut end = None;

    while running.load(Ordering::Acquire) {
        let read = match device.read(frame.buf_mut()) {
            Ok(read) => read,
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    error!("capture device fault: {e}");
                    end = Some(StreamEnd::Fault(StreamError::Device(e.to_string())));
                }
                break;
            }
        };

        if read == 0 {
            // Transient: the device had nothing for us this cycle.
            trace!("empty capture read");
            thread::sleep(backoff);
            continue;
        }

        frame.set_len(read);
        if read < frame.capacity() {
            trace!(bytes = read, "short capture read; forwarding partial frame");
        }

        if let Err(e) = sink.write_all(frame.bytes()).and_then(|_| sink.flush()) {
            if running.load(Ordering::Acquire) {
                error!("link write fault: {e}");
                end = Some(StreamEnd::Fault(StreamError::Link(e)));
            }
            break;
        }
    }

    running.store(false, Ordering::Release);
    device.release();
    if sink.owns_link() {
        sink.control().close();
    }
    if let Some(end) = end {
        on_end(end);
    }
    debug!("capture loop exited");
}
