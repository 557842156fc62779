//! PCM format and frame buffer types

use crate::constants::{BYTES_PER_SAMPLE, CHANNELS, SAMPLE_RATE};

/// Linear PCM, 16-bit signed, interleaved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub const fn bytes_per_sample(&self) -> usize {
        BYTES_PER_SAMPLE
    }

    /// Bytes per second of audio in this format
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.bytes_per_sample()
    }

    /// Byte count for `millis` of audio, aligned down to whole samples
    pub fn bytes_for_millis(&self, millis: u64) -> usize {
        let raw = self.byte_rate() * millis as usize / 1000;
        (raw / self.bytes_per_sample()).max(1) * self.bytes_per_sample()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, CHANNELS)
    }
}

/// One read/write cycle's worth of samples.
///
/// Fixed capacity, tagged with the count of valid bytes; a short device
/// read legally leaves `len < capacity`.
pub struct AudioFrame {
    buf: Box<[u8]>,
    len: usize,
}

impl AudioFrame {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record how many bytes of the buffer a read filled in
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }

    /// The valid bytes of the frame
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The full-capacity buffer, for the next read to fill
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Iterate the valid bytes as little-endian signed 16-bit samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.bytes()
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }
}
