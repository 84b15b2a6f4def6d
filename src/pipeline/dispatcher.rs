//! # Translation Dispatcher
//!
//! Single-flight FIFO of segments waiting for translation. At most one
//! segment is in flight per session; later segments queue behind it and are
//! released one at a time, in arrival order, as each call completes
//! (successfully or not).

use std::collections::VecDeque;
use std::time::Instant;

/// One flushed unit of recognized text.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: u64,
    pub text: String,
    pub flushed_at: Instant,
}

#[derive(Debug, Default)]
pub struct TranslationDispatcher {
    queue: VecDeque<Segment>,
    in_flight: Option<u64>,
    next_id: u64,
}

impl TranslationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a flushed segment.
    ///
    /// Returns the segment when it may start right away; otherwise it is queued
    /// and `None` is returned.
    pub fn submit(&mut self, text: String) -> Option<Segment> {
        self.next_id += 1;
        let segment = Segment {
            id: self.next_id,
            text,
            flushed_at: Instant::now(),
        };

        if self.in_flight.is_none() {
            self.in_flight = Some(segment.id);
            Some(segment)
        } else {
            self.queue.push_back(segment);
            None
        }
    }

    /// Mark the in-flight call for `id` finished and release the next segment.
    ///
    /// A completion for anything other than the in-flight segment is ignored.
    pub fn complete(&mut self, id: u64) -> Option<Segment> {
        if self.in_flight != Some(id) {
            return None;
        }

        match self.queue.pop_front() {
            Some(next) => {
                self.in_flight = Some(next.id);
                Some(next)
            }
            None => {
                self.in_flight = None;
                None
            }
        }
    }

    /// Forget queued segments and the in-flight marker.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight = None;
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
