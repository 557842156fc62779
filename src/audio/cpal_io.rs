//! cpal-backed microphone and speaker devices
//!
//! cpal streams are callback-driven and `!Send`, while the relay loops
//! want blocking reads and writes from their own threads. Each adapter
//! therefore arms by spawning a keeper thread that owns the stream for
//! its whole life and bridges it to the loop through a channel (input)
//! or a shared ring of pending bytes (output).

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Sample, SampleRate, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::audio::device::{AudioInput, AudioOutput};
use crate::audio::frame::AudioFormat;

/// How long a capture read waits for the next callback before giving
/// the loop an empty cycle
const READ_WAIT: Duration = Duration::from_millis(250);

/// Callback frames buffered between the audio thread and the loop
const FRAME_QUEUE: usize = 32;

fn stream_config(format: AudioFormat) -> StreamConfig {
    StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    }
}

/// Buffer requirement from what the host device advertises, floored at
/// 10 ms so a degenerate minimum never starves the loop.
fn min_buffer_bytes(format: AudioFormat, supported: Option<SupportedBufferSize>) -> usize {
    let floor = format.bytes_for_millis(10);
    match supported {
        Some(SupportedBufferSize::Range { min, .. }) => {
            (min as usize * format.bytes_per_sample()).max(floor)
        }
        _ => floor,
    }
}

/// Default microphone, exposed as a blocking byte reader
pub struct CpalInput {
    format: AudioFormat,
    state: Option<InputState>,
}

struct InputState {
    frames: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    // Dropping the sender tells the keeper thread to tear down.
    _shutdown: Sender<()>,
}

impl CpalInput {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            state: None,
        }
    }
}

impl AudioInput for CpalInput {
    fn min_buffer_size(&self, format: AudioFormat) -> usize {
        let supported = cpal::default_host()
            .default_input_device()
            .and_then(|device| device.default_input_config().ok())
            .map(|config| *config.buffer_size());
        min_buffer_bytes(format, supported)
    }

    fn arm(&mut self) -> io::Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let config = stream_config(self.format);
        let (frame_tx, frame_rx) = bounded::<Vec<u8>>(FRAME_QUEUE);
        let (ready_tx, ready_rx) = bounded::<io::Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        thread::Builder::new()
            .name("voicelink-cpal-input".to_string())
            .spawn(move || {
                input_keeper(config, frame_tx, ready_tx, shutdown_rx);
            })
            .map_err(io::Error::other)?;

        ready_rx
            .recv()
            .map_err(|_| io::Error::other("input keeper died before reporting readiness"))??;

        self.state = Some(InputState {
            frames: frame_rx,
            pending: VecDeque::new(),
            _shutdown: shutdown_tx,
        });
        debug!("microphone armed");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| io::Error::other("read on an unarmed input device"))?;

        if state.pending.is_empty() {
            match state.frames.recv_timeout(READ_WAIT) {
                Ok(frame) => state.pending.extend(frame),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::other("capture stream died"));
                }
            }
        }

        let n = buf.len().min(state.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.pending.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            debug!("microphone released");
        }
    }
}

/// Owns the cpal input stream until the shutdown sender is dropped
fn input_keeper(
    config: StreamConfig,
    frames: Sender<Vec<u8>>,
    ready: Sender<io::Result<()>>,
    shutdown: Receiver<()>,
) {
    let build = || -> io::Result<cpal::Stream> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| io::Error::other("no input device available"))?;
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut frame = Vec::with_capacity(data.len() * 2);
                    for &sample in data {
                        let sample: i16 = sample.to_sample();
                        frame.extend_from_slice(&sample.to_le_bytes());
                    }
                    // A full queue means the loop is behind; dropping
                    // the frame is better than stalling the callback.
                    if frames.try_send(frame).is_err() {
                        warn!("capture queue full; dropping a frame");
                    }
                },
                |e| error!("capture stream error: {e}"),
                None,
            )
            .map_err(io::Error::other)?;
        stream.play().map_err(io::Error::other)?;
        Ok(stream)
    };

    match build() {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            // Park until every shutdown sender is gone, keeping the
            // stream alive meanwhile.
            let _ = shutdown.recv();
            drop(stream);
            debug!("input keeper exited");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

struct OutputRing {
    buf: Mutex<VecDeque<u8>>,
    cond: Condvar,
    capacity: usize,
    closed: AtomicBool,
}

impl OutputRing {
    fn push(&self, bytes: &[u8]) -> io::Result<()> {
        let mut buf = self.buf.lock();
        for chunk in bytes.chunks(self.capacity) {
            while buf.len() + chunk.len() > self.capacity {
                if self.closed.load(Ordering::Acquire) {
                    return Err(io::Error::other("output device released"));
                }
                self.cond.wait(&mut buf);
            }
            buf.extend(chunk);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cond.notify_all();
    }
}

/// Default speaker, exposed as a blocking byte writer
pub struct CpalOutput {
    format: AudioFormat,
    state: Option<OutputState>,
}

struct OutputState {
    ring: Arc<OutputRing>,
    _shutdown: Sender<()>,
}

impl CpalOutput {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            state: None,
        }
    }
}

impl AudioOutput for CpalOutput {
    fn min_buffer_size(&self, format: AudioFormat) -> usize {
        let supported = cpal::default_host()
            .default_output_device()
            .and_then(|device| device.default_output_config().ok())
            .map(|config| *config.buffer_size());
        min_buffer_bytes(format, supported)
    }

    fn arm(&mut self) -> io::Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        let config = stream_config(self.format);
        // Cap the ring at a quarter second so a stalled callback
        // applies backpressure instead of buffering unbounded latency.
        let ring = Arc::new(OutputRing {
            buf: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            capacity: self.format.byte_rate() / 4,
            closed: AtomicBool::new(false),
        });
        let (ready_tx, ready_rx) = bounded::<io::Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let keeper_ring = Arc::clone(&ring);
        thread::Builder::new()
            .name("voicelink-cpal-output".to_string())
            .spawn(move || {
                output_keeper(config, keeper_ring, ready_tx, shutdown_rx);
            })
            .map_err(io::Error::other)?;

        ready_rx
            .recv()
            .map_err(|_| io::Error::other("output keeper died before reporting readiness"))??;

        self.state = Some(OutputState {
            ring,
            _shutdown: shutdown_tx,
        });
        debug!("speaker armed");
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| io::Error::other("write on an unarmed output device"))?;
        state.ring.push(buf)
    }

    fn release(&mut self) {
        if let Some(state) = self.state.take() {
            state.ring.close();
            debug!("speaker released");
        }
    }
}

/// Owns the cpal output stream until the shutdown sender is dropped
fn output_keeper(
    config: StreamConfig,
    ring: Arc<OutputRing>,
    ready: Sender<io::Result<()>>,
    shutdown: Receiver<()>,
) {
    let callback_ring = Arc::clone(&ring);
    let build = || -> io::Result<cpal::Stream> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| io::Error::other("no output device available"))?;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buf = callback_ring.buf.lock();
                    for slot in data.iter_mut() {
                        // Underrun plays silence; real data resumes
                        // whenever the loop catches up.
                        let sample = match (buf.pop_front(), buf.pop_front()) {
                            (Some(lo), Some(hi)) => i16::from_le_bytes([lo, hi]),
                            _ => 0,
                        };
                        *slot = sample.to_sample();
                    }
                    drop(buf);
                    callback_ring.cond.notify_all();
                },
                |e| error!("playback stream error: {e}"),
                None,
            )
            .map_err(io::Error::other)?;
        stream.play().map_err(io::Error::other)?;
        Ok(stream)
    };

    match build() {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            let _ = shutdown.recv();
            ring.close();
            drop(stream);
            debug!("output keeper exited");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}
