//! Speaker playback loop
//!
//! Mirror of the capture side: reads PCM from the link on a dedicated
//! thread and writes it to the local output device. A zero-length read
//! is end-of-stream and ends the loop; an external stop never waits for
//! end-of-stream — it force-closes the source to unblock the read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::audio::device::AudioOutput;
use crate::audio::frame::{AudioFormat, AudioFrame};
use crate::audio::{EndCallback, LoopWorker, StreamEnd};
use crate::constants::STOP_GRACE;
use crate::error::StreamError;
use crate::link::transport::{ByteSource, LinkControl};

/// Continuously reads frames from a byte source and plays them on the
/// output device.
pub struct AudioPlaybackSink {
    format: AudioFormat,
    running: Arc<AtomicBool>,
    device: Mutex<Option<Box<dyn AudioOutput>>>,
    worker: Mutex<Option<(LoopWorker, Arc<dyn LinkControl>)>>,
    stop_grace: Duration,
}

impl AudioPlaybackSink {
    pub fn new(device: Box<dyn AudioOutput>, format: AudioFormat) -> Self {
        Self {
            format,
            running: Arc::new(AtomicBool::new(false)),
            device: Mutex::new(Some(device)),
            worker: Mutex::new(None),
            stop_grace: STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    pub fn is_playing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the playback loop. Idempotent while already running.
    ///
    /// `on_end` fires only when the loop terminates on its own: peer
    /// end-of-stream or an I/O fault.
    pub fn start_playing(&self, source: ByteSource, on_end: EndCallback) -> Result<(), StreamError> {
        let mut worker_slot = self.worker.lock();
        if self.running.load(Ordering::Acquire) {
            debug!("playback already running");
            return Ok(());
        }

        let mut device = self.device.lock().take().ok_or(StreamError::Consumed)?;
        device.arm().map_err(|e| StreamError::Device(e.to_string()))?;

        let frame_len = device
            .min_buffer_size(self.format)
            .max(self.format.bytes_per_sample());
        let running = Arc::clone(&self.running);
        let control = source.control();
        let (done_tx, done_rx) = bounded::<()>(1);

        running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("voicelink-playback".to_string())
            .spawn(move || {
                let _done = done_tx;
                playback_loop(device, source, running, frame_len, on_end);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                StreamError::Device(e.to_string())
            })?;

        *worker_slot = Some((LoopWorker::new(handle, done_rx), control));
        debug!(frame_len, "playback started");
        Ok(())
    }

    /// Stop the playback loop and wait for the thread to exit.
    /// Idempotent, safe from the loop thread and from external threads.
    ///
    /// The blocking source read has no latency bound of its own — a
    /// silent peer can hold it open forever — so stop force-closes the
    /// source up front instead of waiting for natural end-of-stream.
    pub fn stop_playing(&self) {
        self.running.store(false, Ordering::Release);

        let mut slot = self.worker.lock();
        let Some((worker, control)) = slot.take() else {
            debug!("playback already stopped");
            return;
        };
        if worker.is_current() {
            *slot = Some((worker, control));
            return;
        }
        drop(slot);

        control.close();
        let grace = self.stop_grace;
        worker.reap(grace, || {
            warn!("playback thread still blocked after {grace:?}");
        });
        debug!("playback stopped");
    }
}

impl Drop for AudioPlaybackSink {
    fn drop(&mut self) {
        self.stop_playing();
    }
}

fn playback_loop(
    mut device: Box<dyn AudioOutput>,
    mut source: ByteSource,
    running: Arc<AtomicBool>,
    frame_len: usize,
    on_end: EndCallback,
) {
    let mut frame = AudioFrame::with_capacity(frame_len);
    let mut end = None;

    while running.load(Ordering::Acquire) {
        let read = match source.read(frame.buf_mut()) {
            Ok(0) => {
                if running.load(Ordering::Acquire) {
                    debug!("peer closed the stream");
                    end = Some(StreamEnd::EndOfStream);
                }
                break;
            }
            Ok(read) => read,
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    error!("link read fault: {e}");
                    end = Some(StreamEnd::Fault(StreamError::Link(e)));
                }
                break;
            }
        };

        frame.set_len(read);
        if let Err(e) = device.write(frame.bytes()) {
            if running.load(Ordering::Acquire) {
                error!("playback device fault: {e}");
                end = Some(StreamEnd::Fault(StreamError::Device(e.to_string())));
            }
            break;
        }
    }

    running.store(false, Ordering::Release);
    device.release();
    if let Some(end) = end {
        on_end(end);
    }
    debug!("playback loop exited");
}
