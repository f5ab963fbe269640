//! Staging buffer between the resampler and the audio device
//!
//! Holds the most recently converted PCM chunk and a read cursor. The device
//! callback drains it; once drained the audio engine refills it in place.

/// Converted PCM chunk plus read cursor
#[derive(Debug, Default)]
pub struct AudioChunk {
    buf: Vec<u8>,
    index: usize,
}

impl AudioChunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes in the current chunk
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes not yet copied to the device
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.index
    }

    pub fn is_drained(&self) -> bool {
        self.index >= self.buf.len()
    }

    /// Clear the chunk and hand out its storage for a refill
    pub fn refill(&mut self) -> &mut Vec<u8> {
        self.buf.clear();
        self.index = 0;
        &mut self.buf
    }

    /// The chunk contents, for in-place edits before any byte was copied out
    pub fn unread_mut(&mut self) -> &mut Vec<u8> {
        debug_assert_eq!(self.index, 0);
        &mut self.buf
    }

    /// Replace the chunk with `len` bytes of `value`
    pub fn fill_silence(&mut self, len: usize, value: u8) {
        let buf = self.refill();
        buf.resize(len, value);
    }

    /// Copy as much as fits into `out`, returning the bytes copied
    pub fn copy_to(&mut self, out: &mut [u8]) -> usize {
        let n = self.remaining().min(out.len());
        out[..n].copy_from_slice(&self.buf[self.index..self.index + n]);
        self.index += n;
        n
    }

    /// Drop whatever has not been played yet
    pub fn reset(&mut self) {
        self.buf.clear();
        self.index = 0;
    }
}
