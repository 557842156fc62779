//! TCP stand-in transport for development and demos
//!
//! Maps the serial-channel model onto plain TCP so two instances can
//! talk over localhost without a radio: service-record opens land on a
//! base port, explicit numbered channels on base + channel.

use std::io;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::discovery::DeviceIdentity;
use crate::link::transport::{ByteSink, ByteSource, LinkControl, LinkSocket, Transport};

/// Outbound TCP transport
pub struct TcpTransport {
    base_port: u16,
}

impl TcpTransport {
    pub fn new(base_port: u16) -> Self {
        Self { base_port }
    }

    fn open(&self, peer: &DeviceIdentity, port: u16) -> io::Result<Box<dyn LinkSocket>> {
        debug!(peer = %peer, port, "tcp connect");
        let stream = TcpStream::connect((peer.as_str(), port))?;
        Ok(Box::new(TcpLinkSocket::new(stream)?))
    }
}

impl Transport for TcpTransport {
    fn is_available(&self) -> bool {
        true
    }

    fn open_service(
        &self,
        peer: &DeviceIdentity,
        _service: Uuid,
    ) -> io::Result<Box<dyn LinkSocket>> {
        self.open(peer, self.base_port)
    }

    fn open_channel(&self, peer: &DeviceIdentity, channel: u8) -> io::Result<Box<dyn LinkSocket>> {
        self.open(peer, self.base_port + u16::from(channel))
    }
}

/// Bind `port` and block until one peer connects
pub fn accept_one(port: u16) -> io::Result<Box<dyn LinkSocket>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!(port = listener.local_addr()?.port(), "waiting for a peer");
    let (stream, peer) = listener.accept()?;
    info!(%peer, "peer connected");
    Ok(Box::new(TcpLinkSocket::new(stream)?))
}

struct TcpLinkControl {
    stream: TcpStream,
    closed: AtomicBool,
}

impl LinkControl for TcpLinkControl {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Shutdown, not drop: the clones used by the loops must
            // see the teardown immediately.
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One established TCP link
pub struct TcpLinkSocket {
    reader: TcpStream,
    writer: TcpStream,
    control: Arc<TcpLinkControl>,
}

impl TcpLinkSocket {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader,
            writer,
            control: Arc::new(TcpLinkControl {
                stream,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

impl LinkSocket for TcpLinkSocket {
    fn into_parts(self: Box<Self>) -> (ByteSource, ByteSink, Arc<dyn LinkControl>) {
        let control = self.control as Arc<dyn LinkControl>;
        (
            ByteSource::new(Box::new(self.reader), Arc::clone(&control)),
            ByteSink::new(Box::new(self.writer), Arc::clone(&control)),
            control,
        )
    }
}
