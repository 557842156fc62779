//! Duplex session lifecycle
//!
//! A [`DuplexSession`] owns one connection plus the capture and
//! playback loops, and is the only place that starts or stops them.
//! Start fully establishes both loops or rolls everything back before
//! returning; stop is idempotent and race-free under concurrent
//! triggers (user action, a fault inside either loop, owner teardown).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{AudioCaptureSource, AudioPlaybackSink, AudioRouting, EndCallback, StreamEnd};
use crate::error::SessionError;
use crate::link::Connection;

/// Session lifecycle state.
///
/// Transitions run one way: Idle → Starting → Running → Stopping →
/// Stopped. Stopped is terminal; reconnecting takes a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            _ => SessionState::Stopped,
        }
    }
}

/// Callbacks to the owning UI/CLI layer
pub trait SessionEvents: Send + Sync {
    /// A fault inside an active loop ended the session
    fn on_session_error(&self, reason: &str);
}

/// Events sink that ignores everything
pub struct NullEvents;

impl SessionEvents for NullEvents {
    fn on_session_error(&self, _reason: &str) {}
}

/// One bidirectional audio relay over one connection
pub struct DuplexSession {
    state: AtomicU8,
    capture: AudioCaptureSource,
    playback: AudioPlaybackSink,
    routing: Arc<dyn AudioRouting>,
    events: Arc<dyn SessionEvents>,
    connection: Mutex<Option<Connection>>,
}

impl DuplexSession {
    pub fn new(
        capture: AudioCaptureSource,
        playback: AudioPlaybackSink,
        routing: Arc<dyn AudioRouting>,
        events: Arc<dyn SessionEvents>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(SessionState::Idle as u8),
            capture,
            playback,
            routing,
            events,
            connection: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Start both relay loops over `connection`.
    ///
    /// Rejected unless the session is Idle. If anything fails along the
    /// way — including a stop or fault cascade landing while start is
    /// still in flight — whatever was already started is torn down and
    /// the connection closed before the error is returned.
    pub fn start(self: &Arc<Self>, mut connection: Connection) -> Result<(), SessionError> {
        if !self.transition(SessionState::Idle, SessionState::Starting) {
            return Err(SessionError::InvalidState(self.state()));
        }
        info!("starting duplex session");

        if let Err(e) = self.routing.route_to_link() {
            connection.close();
            self.state
                .store(SessionState::Stopped as u8, Ordering::Release);
            return Err(SessionError::Routing(e.to_string()));
        }

        let (Some(output), Some(input)) = (connection.take_output(), connection.take_input())
        else {
            self.routing.restore();
            connection.close();
            self.state
                .store(SessionState::Stopped as u8, Ordering::Release);
            return Err(SessionError::Stream(crate::error::StreamError::LinkClosed));
        };

        if let Err(e) = self
            .capture
            .start_capturing(output, end_callback(Arc::downgrade(self), "capture"))
        {
            warn!("capture failed to start: {e}");
            self.routing.restore();
            connection.close();
            self.state
                .store(SessionState::Stopped as u8, Ordering::Release);
            return Err(e.into());
        }

        if let Err(e) = self
            .playback
            .start_playing(input, end_callback(Arc::downgrade(self), "playback"))
        {
            warn!("playback failed to start: {e}");
            self.capture.stop_capturing();
            self.routing.restore();
            connection.close();
            self.state
                .store(SessionState::Stopped as u8, Ordering::Release);
            return Err(e.into());
        }

        *self.connection.lock() = Some(connection);
        if !self.transition(SessionState::Starting, SessionState::Running) {
            // A stop raced in mid-start, typically a fault cascade
            // from a loop that died young. The stopper only flagged
            // the state; the rollback is ours.
            warn!("session stopped during startup");
            self.teardown();
            self.state
                .store(SessionState::Stopped as u8, Ordering::Release);
            return Err(SessionError::InvalidState(SessionState::Stopping));
        }
        info!("duplex session running");
        Ok(())
    }

    /// Stop the session. Idempotent under every trigger.
    ///
    /// Exactly one of any number of concurrent callers wins the
    /// transition into Stopping and performs the teardown; all the
    /// others observe a later state and return immediately. A stop
    /// landing inside the Starting window flips the state and leaves
    /// the rollback to `start`, which owns everything set up so far.
    pub fn stop(&self) {
        if self.transition(SessionState::Running, SessionState::Stopping) {
            info!("stopping duplex session");
            self.teardown();
            self.state
                .store(SessionState::Stopped as u8, Ordering::Release);
            info!("duplex session stopped");
            return;
        }
        if self.transition(SessionState::Starting, SessionState::Stopping) {
            debug!("stop during startup; start will roll back");
            return;
        }
        debug!(state = ?self.state(), "stop: nothing to do");
    }

    fn teardown(&self) {
        self.capture.stop_capturing();
        self.playback.stop_playing();
        self.routing.restore();
        if let Some(mut connection) = self.connection.lock().take() {
            connection.close();
        }
    }
}

impl Drop for DuplexSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cascade a loop's self-termination into a session stop.
///
/// Runs on the loop's own thread; `stop` tolerates that because the
/// loop-side stop skips joining its own thread.
fn end_callback(session: Weak<DuplexSession>, loop_name: &'static str) -> EndCallback {
    Box::new(move |end| {
        let Some(session) = session.upgrade() else {
            return;
        };
        match &end {
            StreamEnd::EndOfStream => info!("{loop_name} stream ended by peer"),
            StreamEnd::Fault(e) => {
                warn!("{loop_name} fault: {e}");
                session
                    .events
                    .on_session_error(&format!("{loop_name}: {e}"));
            }
        }
        session.stop();
    })
}
