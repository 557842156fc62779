//! Voicelink demo binary
//!
//! Runs a duplex voice session between two hosts over the TCP
//! development transport:
//!
//! ```text
//! host A$ voicelink listen
//! host B$ voicelink call <host-a>
//! ```
//!
//! Either side presses Enter to hang up; a dropped peer ends the
//! session on its own.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicelink::audio::cpal_io::{CpalInput, CpalOutput};
use voicelink::audio::{AudioCaptureSource, AudioFormat, AudioPlaybackSink, NullRouting};
use voicelink::config::AppConfig;
use voicelink::discovery::{
    DeviceIdentity, DiscoveryCoordinator, DiscoveryListener, DiscoverySource,
    DiscoverySubscription,
};
use voicelink::error::DiscoveryError;
use voicelink::link::tcp::{accept_one, TcpTransport};
use voicelink::link::{Connection, ConnectionManager};
use voicelink::session::{DuplexSession, SessionEvents};

/// The demo dials explicit hosts, so discovery never finds anything
struct NoDiscovery;

struct NoSubscription;

impl DiscoverySubscription for NoSubscription {
    fn unsubscribe(&mut self) {}
}

impl DiscoverySource for NoDiscovery {
    fn subscribe(
        &self,
        _listener: DiscoveryListener,
    ) -> Result<Box<dyn DiscoverySubscription>, DiscoveryError> {
        Ok(Box::new(NoSubscription))
    }
}

struct LogEvents;

impl SessionEvents for LogEvents {
    fn on_session_error(&self, reason: &str) {
        tracing::error!("session error: {reason}");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_default();

    let connection = match mode.as_str() {
        "listen" => {
            let port = match args.next() {
                Some(port) => port.parse().context("invalid port")?,
                None => config.link.tcp_base_port,
            };
            Connection::open(accept_one(port)?)
        }
        "call" => {
            let host = args.next().context("usage: voicelink call <host> [port]")?;
            let port = match args.next() {
                Some(port) => port.parse().context("invalid port")?,
                None => config.link.tcp_base_port,
            };
            let discovery = Arc::new(DiscoveryCoordinator::new(Arc::new(NoDiscovery)));
            let manager = ConnectionManager::new(Arc::new(TcpTransport::new(port)), discovery)
                .with_fallback_channel(config.link.fallback_channel);
            manager
                .connect(&DeviceIdentity::new(host))
                .context("connecting to peer")?
        }
        _ => bail!("usage: voicelink listen [port] | voicelink call <host> [port]"),
    };

    let format = AudioFormat::new(config.audio.sample_rate, config.audio.channels);
    let capture = AudioCaptureSource::new(Box::new(CpalInput::new(format)), format)
        .with_timing(config.link.capture_retry(), config.link.stop_grace());
    let playback = AudioPlaybackSink::new(Box::new(CpalOutput::new(format)), format)
        .with_stop_grace(config.link.stop_grace());

    let session = DuplexSession::new(capture, playback, Arc::new(NullRouting), Arc::new(LogEvents));
    session.start(connection).context("starting session")?;

    println!("Voice link up. Press Enter to hang up.");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    session.stop();
    tracing::info!("goodbye");
    Ok(())
}
