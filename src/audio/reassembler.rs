//! # Chunk Reassembler
//!
//! Re-chunks a byte stream of 16-bit linear PCM so that every payload handed
//! onward ends on a whole-sample boundary. Network reads split the stream
//! wherever they like; relaying an odd-length chunk would shift every later
//! sample by one byte on the receiving side.
//!
//! ## Algorithm (per chunk):
//! 1. Prepend the byte left over from the previous chunk, if any
//! 2. Emit the largest even-length prefix (if non-empty)
//! 3. Keep a trailing odd byte as the new leftover
//!
//! At end of stream a single unpaired byte is discarded.

/// Carries at most one unpaired byte between reads (`leftoverByte`).
#[derive(Debug, Default, Clone)]
pub struct ChunkReassembler {
    leftover: Option<u8>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received chunk; returns the even-length payload to emit, if any.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        let total = chunk.len() + usize::from(self.leftover.is_some());
        if total == 0 {
            return None;
        }

        let mut joined = Vec::with_capacity(total);
        if let Some(byte) = self.leftover.take() {
            joined.push(byte);
        }
        joined.extend_from_slice(chunk);

        if joined.len() % 2 == 1 {
            self.leftover = joined.pop();
        }

        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    /// End of stream: resets the state and returns the discarded byte, if any.
    pub fn finish(&mut self) -> Option<u8> {
        self.leftover.take()
    }

    pub fn has_leftover(&self) -> bool {
        self.leftover.is_some()
    }
}
