//! Incremental read buffer for the ESL byte stream

use crate::constants::{BUF_CHUNK, MAX_BUFFER_SIZE};
use crate::error::{EslError, EslResult};

/// Growable byte buffer with a consume cursor.
///
/// Data read from the socket is appended at the tail; the parser consumes
/// from the head without shifting bytes on every extraction. `compact()`
/// reclaims consumed space once a full message has been taken out.
pub(crate) struct EslBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl EslBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(BUF_CHUNK),
            pos: 0,
        }
    }

    /// Append raw bytes from the socket.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data
            .extend_from_slice(bytes);
    }

    /// Enforce the total-size safety limit.
    pub fn check_size_limits(&self) -> EslResult<()> {
        if self.data.len() > MAX_BUFFER_SIZE {
            return Err(EslError::protocol_error(format!(
                "Receive buffer exceeded {} bytes without a complete message",
                MAX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Extract all bytes up to (but excluding) `pattern`, consuming the
    /// pattern too. Returns `None` if the pattern has not arrived yet.
    pub fn extract_until_pattern(&mut self, pattern: &[u8]) -> Option<Vec<u8>> {
        let window = &self.data[self.pos..];
        let found = window
            .windows(pattern.len())
            .position(|w| w == pattern)?;
        let out = window[..found].to_vec();
        self.pos += found + pattern.len();
        Some(out)
    }

    /// Extract exactly `count` bytes, or `None` if not enough have arrived.
    pub fn extract_bytes(&mut self, count: usize) -> Option<Vec<u8>> {
        if self.remaining() < count {
            return None;
        }
        let out = self.data[self.pos..self.pos + count].to_vec();
        self.pos += count;
        Some(out)
    }

    /// Drop consumed bytes and reset the cursor.
    pub fn compact(&mut self) {
        if self.pos > 0 {
            self.data
                .drain(..self.pos);
            self.pos = 0;
        }
    }
}
