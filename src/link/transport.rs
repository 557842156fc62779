//! Transport-facing traits and the byte-stream halves shared by the
//! audio loops
//!
//! The radio itself is a platform collaborator; the crate only talks to
//! it through [`Transport`]. An open socket splits into a [`ByteSource`]
//! and a [`ByteSink`] plus one [`LinkControl`], the force-close handle
//! that unblocks a read or write stuck on the wire.

use std::io::{self, Read, Write};
use std::sync::Arc;

use uuid::Uuid;

use crate::discovery::DeviceIdentity;

/// Force-close handle for an open link.
///
/// `close` must be idempotent; after it returns, a pending read on the
/// link yields end-of-stream and a pending write fails with an I/O
/// error. This is the escalation lever `stop()` uses to guarantee
/// bounded-time loop exit.
pub trait LinkControl: Send + Sync {
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// One open serial-style socket, prior to splitting
pub trait LinkSocket: Send {
    fn into_parts(self: Box<Self>) -> (ByteSource, ByteSink, Arc<dyn LinkControl>);
}

/// The radio transport, interface only
pub trait Transport: Send + Sync {
    /// Whether the radio is powered and usable
    fn is_available(&self) -> bool;

    /// Open a stream channel via service-record lookup.
    ///
    /// Blocking; may take multiple seconds. Call off any
    /// latency-sensitive thread.
    fn open_service(
        &self,
        peer: &DeviceIdentity,
        service: Uuid,
    ) -> io::Result<Box<dyn LinkSocket>>;

    /// Open an explicit numbered channel, bypassing service-record
    /// lookup. Blocking, same as [`Transport::open_service`].
    fn open_channel(&self, peer: &DeviceIdentity, channel: u8) -> io::Result<Box<dyn LinkSocket>>;
}

/// Reading half of an open link
pub struct ByteSource {
    reader: Box<dyn Read + Send>,
    control: Arc<dyn LinkControl>,
}

impl ByteSource {
    pub fn new(reader: Box<dyn Read + Send>, control: Arc<dyn LinkControl>) -> Self {
        Self { reader, control }
    }

    /// Blocking read. `Ok(0)` means the peer closed the stream.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    pub fn control(&self) -> Arc<dyn LinkControl> {
        Arc::clone(&self.control)
    }
}

/// Writing half of an open link
pub struct ByteSink {
    writer: Box<dyn Write + Send>,
    control: Arc<dyn LinkControl>,
    owns_link: bool,
}

impl ByteSink {
    pub fn new(writer: Box<dyn Write + Send>, control: Arc<dyn LinkControl>) -> Self {
        Self {
            writer,
            control,
            owns_link: false,
        }
    }

    /// Mark this sink as owning the underlying link: whoever holds it
    /// is responsible for closing the link when done with it.
    pub fn into_owned(mut self) -> Self {
        self.owns_link = true;
        self
    }

    pub fn owns_link(&self) -> bool {
        self.owns_link
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn control(&self) -> Arc<dyn LinkControl> {
        Arc::clone(&self.control)
    }
}
