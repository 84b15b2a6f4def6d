//! # Audio Batcher
//!
//! Accumulates raw audio frames received from a client and hands them out as
//! one contiguous batch, so the recognizer sees a few larger writes instead of
//! many tiny ones.
//!
//! ## Conservation:
//! Bytes are never dropped or duplicated. A batch that could not be delivered
//! is put back with [`AudioBatcher::requeue`] and goes out first on the next
//! flush.

use std::collections::VecDeque;

/// Per-session queue of raw audio frames (the session's `audioQueue`).
#[derive(Debug, Default)]
pub struct AudioBatcher {
    /// Frames waiting to be forwarded, oldest first
    queue: VecDeque<Vec<u8>>,

    /// Sum of the lengths of all queued frames
    queued_bytes: usize,

    /// Lifetime counters, used for session stats
    total_pushed: u64,
    total_taken: u64,
}

impl AudioBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one inbound frame. Empty frames are ignored.
    pub fn push(&mut self, frame: Vec<u8>) {
        if frame.is_empty() {
            return;
        }
        self.queued_bytes += frame.len();
        self.total_pushed += frame.len() as u64;
        self.queue.push_back(frame);
    }

    /// Concatenate every queued frame into one buffer and clear the queue.
    ///
    /// Returns `None` when nothing is queued.
    pub fn take_batch(&mut self) -> Option<Vec<u8>> {
        if self.queue.is_empty() {
            return None;
        }

        let batch = if self.queue.len() == 1 {
            self.queue.pop_front().unwrap_or_default()
        } else {
            let mut batch = Vec::with_capacity(self.queued_bytes);
            for frame in self.queue.drain(..) {
                batch.extend_from_slice(&frame);
            }
            batch
        };

        self.queued_bytes = 0;
        self.total_taken += batch.len() as u64;
        Some(batch)
    }

    /// Put an undelivered batch back in front of anything queued since.
    pub fn requeue(&mut self, batch: Vec<u8>) {
        if batch.is_empty() {
            return;
        }
        self.queued_bytes += batch.len();
        self.total_taken -= batch.len() as u64;
        self.queue.push_front(batch);
    }

    /// Drop everything queued (session teardown).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Bytes handed out by `take_batch` and not requeued.
    pub fn total_taken(&self) -> u64 {
        self.total_taken
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

/// Split a batch into writes of at most `max_bytes`. `max_bytes` is expected to be even,
/// so every piece but possibly the last holds whole 16-bit samples.
pub fn split_for_send(batch: &[u8], max_bytes: usize) -> impl Iterator<Item = &[u8]> {
    batch.chunks(max_bytes.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_batch_concatenates_in_order() {
        let mut batcher = AudioBatcher::new();
        batcher.push(vec![1, 2]);
        batcher.push(vec![3, 4, 5]);
        batcher.push(vec![6]);

        assert_eq!(batcher.queued_bytes(), 6);
        assert_eq!(batcher.queued_frames(), 3);
        assert_eq!(batcher.take_batch(), Some(vec![1, 2, 3, 4, 5, 6]));
        assert!(batcher.is_empty());
        assert_eq!(batcher.queued_bytes(), 0);
        assert_eq!(batcher.take_batch(), None);
    }

    #[test]
    fn test_empty_frames_are_ignored() {
        let mut batcher = AudioBatcher::new();
        batcher.push(Vec::new());
        assert!(batcher.is_empty());
        assert_eq!(batcher.take_batch(), None);
    }

    #[test]
    fn test_requeue_goes_first() {
        let mut batcher = AudioBatcher::new();
        batcher.push(vec![1, 2]);
        let batch = batcher.take_batch().unwrap();
        batcher.push(vec![3, 4]);
        batcher.requeue(batch);

        assert_eq!(batcher.take_batch(), Some(vec![1, 2, 3, 4]));
        assert_eq!(batcher.total_taken(), 4);
    }

    #[test]
    fn test_bytes_are_conserved_across_flush_patterns() {
        // Flush after every frame, every other frame, or only at the end:
        // the forwarded bytes must equal the pushed bytes each time.
        for flush_every in 1..=4usize {
            let mut batcher = AudioBatcher::new();
            let mut forwarded = Vec::new();
            let mut pushed = Vec::new();

            for i in 0..17u8 {
                let frame: Vec<u8> = (0..(i % 5 + 1)).map(|j| i.wrapping_mul(7).wrapping_add(j)).collect();
                pushed.extend_from_slice(&frame);
                batcher.push(frame);
                if (i as usize + 1) % flush_every == 0 {
                    if let Some(batch) = batcher.take_batch() {
                        forwarded.extend(batch);
                    }
                }
            }
            if let Some(batch) = batcher.take_batch() {
                forwarded.extend(batch);
            }

            assert_eq!(forwarded, pushed);
            assert_eq!(batcher.total_pushed(), batcher.total_taken());
        }
    }

    #[test]
    fn test_split_for_send() {
        let batch: Vec<u8> = (0..10).collect();
        let pieces: Vec<&[u8]> = split_for_send(&batch, 4).collect();
        assert_eq!(pieces, vec![&[0, 1, 2, 3][..], &[4, 5, 6, 7][..], &[8, 9][..]]);
    }
}
