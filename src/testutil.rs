//! In-process fakes for the platform collaborators
//!
//! A memory-backed link with real blocking semantics (bounded buffer,
//! force-close that unblocks readers and writers), scripted audio
//! devices, a scripted discovery source, and counting fakes for routing
//! and session events.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::audio::device::{AudioInput, AudioOutput, AudioRouting};
use crate::audio::frame::AudioFormat;
use crate::discovery::{
    DeviceIdentity, DiscoveryEvent, DiscoveryListener, DiscoverySource, DiscoverySubscription,
};
use crate::error::DiscoveryError;
use crate::link::transport::{ByteSink, ByteSource, LinkControl, LinkSocket, Transport};
use crate::session::SessionEvents;

// ── Memory pipe ───────────────────────────────────────────────────────

struct PipeBuf {
    data: VecDeque<u8>,
    closed: bool,
}

/// One direction of a memory link: a bounded byte queue with blocking
/// reads and writes, unblocked by `close`.
pub struct PipeShared {
    buf: Mutex<PipeBuf>,
    cond: Condvar,
    capacity: usize,
}

impl PipeShared {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(PipeBuf {
                data: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity,
        })
    }

    fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock();
        while buf.data.is_empty() && !buf.closed {
            self.cond.wait(&mut buf);
        }
        if buf.data.is_empty() {
            return Ok(0); // closed and drained: end-of-stream
        }
        let n = out.len().min(buf.data.len());
        for slot in out.iter_mut().take(n) {
            *slot = buf.data.pop_front().unwrap();
        }
        self.cond.notify_all();
        Ok(n)
    }

    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock();
        loop {
            if buf.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
            }
            if buf.data.len() < self.capacity {
                break;
            }
            self.cond.wait(&mut buf);
        }
        let n = bytes.len().min(self.capacity - buf.data.len());
        buf.data.extend(&bytes[..n]);
        self.cond.notify_all();
        Ok(n)
    }

    fn close(&self) {
        let mut buf = self.buf.lock();
        buf.closed = true;
        self.cond.notify_all();
    }
}

#[derive(Clone)]
pub struct PipeReader(Arc<PipeShared>);

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

#[derive(Clone)]
pub struct PipeWriter(Arc<PipeShared>);

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct MemoryLinkControl {
    pipes: [Arc<PipeShared>; 2],
    closed: AtomicBool,
}

impl LinkControl for MemoryLinkControl {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            for pipe in &self.pipes {
                pipe.close();
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One end of an in-memory duplex link
pub struct MemoryLink {
    reader: PipeReader,
    writer: PipeWriter,
    outgoing: Arc<PipeShared>,
    control: Arc<MemoryLinkControl>,
}

impl MemoryLink {
    pub fn reader(&self) -> PipeReader {
        self.reader.clone()
    }

    pub fn writer(&self) -> PipeWriter {
        self.writer.clone()
    }

    pub fn control(&self) -> Arc<dyn LinkControl> {
        Arc::clone(&self.control) as Arc<dyn LinkControl>
    }

    /// Close only this end's sending direction: the peer sees
    /// end-of-stream while the rest of the link stays up.
    pub fn shutdown_send(&self) {
        self.outgoing.close();
    }
}

impl LinkSocket for MemoryLink {
    fn into_parts(self: Box<Self>) -> (ByteSource, ByteSink, Arc<dyn LinkControl>) {
        let control = Arc::clone(&self.control) as Arc<dyn LinkControl>;
        (
            ByteSource::new(Box::new(self.reader), Arc::clone(&control)),
            ByteSink::new(Box::new(self.writer), Arc::clone(&control)),
            control,
        )
    }
}

/// Build both ends of an in-memory link with `capacity` bytes of buffer
/// per direction. Closing the shared control kills both directions.
pub fn memory_link_pair(capacity: usize) -> (MemoryLink, MemoryLink) {
    let a_to_b = PipeShared::new(capacity);
    let b_to_a = PipeShared::new(capacity);
    let control = Arc::new(MemoryLinkControl {
        pipes: [Arc::clone(&a_to_b), Arc::clone(&b_to_a)],
        closed: AtomicBool::new(false),
    });
    let a = MemoryLink {
        reader: PipeReader(Arc::clone(&b_to_a)),
        writer: PipeWriter(Arc::clone(&a_to_b)),
        outgoing: Arc::clone(&a_to_b),
        control: Arc::clone(&control),
    };
    let b = MemoryLink {
        reader: PipeReader(a_to_b),
        writer: PipeWriter(Arc::clone(&b_to_a)),
        outgoing: b_to_a,
        control,
    };
    (a, b)
}

// ── Transport ─────────────────────────────────────────────────────────

/// Scripted transport: configurable primary/fallback outcomes, with
/// counters for each attempt and the peer ends of every opened link.
pub struct FakeTransport {
    available: AtomicBool,
    fail_primary: AtomicBool,
    fail_fallback: AtomicBool,
    deny: AtomicBool,
    primary_attempts: AtomicUsize,
    fallback_attempts: AtomicUsize,
    remotes: Mutex<Vec<MemoryLink>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            fail_primary: AtomicBool::new(false),
            fail_fallback: AtomicBool::new(false),
            deny: AtomicBool::new(false),
            primary_attempts: AtomicUsize::new(0),
            fallback_attempts: AtomicUsize::new(0),
            remotes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_primary(&self) {
        self.fail_primary.store(true, Ordering::SeqCst);
    }

    pub fn fail_fallback(&self) {
        self.fail_fallback.store(true, Ordering::SeqCst);
    }

    pub fn deny_permission(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn primary_attempts(&self) -> usize {
        self.primary_attempts.load(Ordering::SeqCst)
    }

    pub fn fallback_attempts(&self) -> usize {
        self.fallback_attempts.load(Ordering::SeqCst)
    }

    fn open_pair(&self) -> Box<dyn LinkSocket> {
        // The remote ends are parked here so the links stay usable for
        // as long as the transport lives.
        let (local, remote) = memory_link_pair(4096);
        self.remotes.lock().push(remote);
        Box::new(local)
    }
}

impl Transport for FakeTransport {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn open_service(
        &self,
        _peer: &DeviceIdentity,
        _service: Uuid,
    ) -> io::Result<Box<dyn LinkSocket>> {
        self.primary_attempts.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "connect permission not granted",
            ));
        }
        if self.fail_primary.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no service record",
            ));
        }
        Ok(self.open_pair())
    }

    fn open_channel(&self, _peer: &DeviceIdentity, _channel: u8) -> io::Result<Box<dyn LinkSocket>> {
        self.fallback_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_fallback.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "channel refused",
            ));
        }
        Ok(self.open_pair())
    }
}

// ── Discovery ─────────────────────────────────────────────────────────

struct DiscoveryState {
    listener: Mutex<Option<DiscoveryListener>>,
    active: AtomicUsize,
    deny: AtomicBool,
    available: AtomicBool,
}

/// Discovery source driven manually from tests via [`Self::emit`]
pub struct ScriptedDiscoverySource {
    state: Arc<DiscoveryState>,
}

impl ScriptedDiscoverySource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(DiscoveryState {
                listener: Mutex::new(None),
                active: AtomicUsize::new(0),
                deny: AtomicBool::new(false),
                available: AtomicBool::new(true),
            }),
        }
    }

    pub fn deny_permission(&self) {
        self.state.deny.store(true, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Deliver one raw found-device event to the installed listener
    pub fn emit(&self, event: DiscoveryEvent) {
        if let Some(listener) = self.state.listener.lock().as_ref() {
            listener(event);
        }
    }
}

impl DiscoverySource for ScriptedDiscoverySource {
    fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    fn subscribe(
        &self,
        listener: DiscoveryListener,
    ) -> Result<Box<dyn DiscoverySubscription>, DiscoveryError> {
        if self.state.deny.load(Ordering::SeqCst) {
            return Err(DiscoveryError::PermissionDenied(
                "scan permission not granted".into(),
            ));
        }
        *self.state.listener.lock() = Some(listener);
        self.state.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSubscription {
            state: Arc::clone(&self.state),
            live: true,
        }))
    }
}

struct ScriptedSubscription {
    state: Arc<DiscoveryState>,
    live: bool,
}

impl DiscoverySubscription for ScriptedSubscription {
    fn unsubscribe(&mut self) {
        if !self.live {
            return; // double-unsubscribe is tolerated
        }
        self.live = false;
        *self.state.listener.lock() = None;
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Audio devices ─────────────────────────────────────────────────────

/// Input device that plays back a script of frames.
///
/// An empty script entry models a cycle with no data (`read` returns
/// 0); an exhausted script returns either the `repeat` frame forever or
/// nothing at all.
pub struct ScriptedInput {
    script: Mutex<VecDeque<Vec<u8>>>,
    repeat: Option<Vec<u8>>,
    fail_arm: AtomicBool,
    fail_reads: AtomicBool,
    released: Arc<AtomicBool>,
    min_buf: usize,
}

impl ScriptedInput {
    pub fn with_script(script: Vec<Vec<u8>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            fail_arm: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            released: Arc::new(AtomicBool::new(false)),
            min_buf: 64,
        }
    }

    pub fn with_frames(frames: Vec<Vec<u8>>) -> Self {
        Self::with_script(frames)
    }

    pub fn repeating(frame: Vec<u8>) -> Self {
        let mut input = Self::with_script(Vec::new());
        input.repeat = Some(frame);
        input
    }

    pub fn silent() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn fail_arm(&self) {
        self.fail_arm.store(true, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn released_probe(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl AudioInput for ScriptedInput {
    fn min_buffer_size(&self, _format: AudioFormat) -> usize {
        self.min_buf
    }

    fn arm(&mut self) -> io::Result<()> {
        if self.fail_arm.load(Ordering::SeqCst) {
            return Err(io::Error::other("input device arm failed"));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Emulate the device buffer latency.
        thread::sleep(Duration::from_millis(1));
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::other("input device read failed"));
        }
        let frame = match self.script.lock().pop_front() {
            Some(frame) => frame,
            None => self.repeat.clone().unwrap_or_default(),
        };
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Output device that records every byte written to it
pub struct ScriptedOutput {
    written: Arc<Mutex<Vec<u8>>>,
    fail_arm: AtomicBool,
    fail_writes: AtomicBool,
    arm_delay: Mutex<Duration>,
    armed: Arc<AtomicBool>,
    min_buf: usize,
}

impl ScriptedOutput {
    pub fn new() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            fail_arm: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            arm_delay: Mutex::new(Duration::ZERO),
            armed: Arc::new(AtomicBool::new(false)),
            min_buf: 64,
        }
    }

    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    pub fn fail_arm(&self) {
        self.fail_arm.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make `arm` sleep, to widen the window in which the device is
    /// still being brought up.
    pub fn delay_arm(&self, delay: Duration) {
        *self.arm_delay.lock() = delay;
    }

    pub fn armed_probe(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.armed)
    }
}

impl AudioOutput for ScriptedOutput {
    fn min_buffer_size(&self, _format: AudioFormat) -> usize {
        self.min_buf
    }

    fn arm(&mut self) -> io::Result<()> {
        let delay = *self.arm_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.fail_arm.load(Ordering::SeqCst) {
            return Err(io::Error::other("output device arm failed"));
        }
        self.armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("output device write failed"));
        }
        self.written.lock().extend_from_slice(buf);
        Ok(())
    }

    fn release(&mut self) {}
}

// ── Routing and events ────────────────────────────────────────────────

/// Routing collaborator that counts route/restore calls
pub struct FakeRouting {
    routed: AtomicUsize,
    restored: AtomicUsize,
    fail_next: AtomicBool,
}

impl FakeRouting {
    pub fn new() -> Self {
        Self {
            routed: AtomicUsize::new(0),
            restored: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn routed(&self) -> usize {
        self.routed.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> usize {
        self.restored.load(Ordering::SeqCst)
    }

    pub fn fail_next_route(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl AudioRouting for FakeRouting {
    fn route_to_link(&self) -> io::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("routing refused"));
        }
        self.routed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn restore(&self) {
        self.restored.fetch_add(1, Ordering::SeqCst);
    }
}

/// Session events sink that stores every reported error
pub struct CollectingEvents {
    errors: Mutex<Vec<String>>,
}

impl CollectingEvents {
    pub fn new() -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl SessionEvents for CollectingEvents {
    fn on_session_error(&self, reason: &str) {
        self.errors.lock().push(reason.to_string());
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Poll `pred` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, pred: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    pred()
}

/// Read from `reader` on a helper thread until `n` bytes arrive, the
/// stream ends, or `timeout` elapses. Never returns more than `n`
/// bytes, even from a stream with more in flight.
pub fn read_until<R: Read + Send + 'static>(mut reader: R, n: usize, timeout: Duration) -> Vec<u8> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while out.len() < n {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(k) => out.extend_from_slice(&buf[..k]),
            }
        }
        out.truncate(n);
        let _ = tx.send(out);
    });
    rx.recv_timeout(timeout).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_write_after_close_fails() {
        let (a, _b) = memory_link_pair(16);
        a.control().close();
        let err = a.writer().write(&[1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_pipe_read_drains_then_reports_end_of_stream() {
        let (a, b) = memory_link_pair(16);
        a.writer().write_all(&[1, 2]).unwrap();
        a.shutdown_send();

        let mut reader = b.reader();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close_unblocks_a_pending_read() {
        let (a, b) = memory_link_pair(16);
        let mut reader = b.reader();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        thread::sleep(Duration::from_millis(20));
        a.control().close();

        let result = handle.join().unwrap().unwrap();
        assert_eq!(result, 0);
    }

    #[test]
    fn test_bounded_writer_blocks_until_closed() {
        let (a, _b) = memory_link_pair(4);
        let mut writer = a.writer();
        let control = a.control();
        let handle = thread::spawn(move || writer.write_all(&[0u8; 32]));

        thread::sleep(Duration::from_millis(20));
        control.close();

        assert!(handle.join().unwrap().is_err());
    }
}
