//! # Speech Playback Queue
//!
//! Holds translated text waiting to be spoken and enforces that only one
//! utterance per session is being synthesized and streamed at a time.
//!
//! ## Drain loop:
//! 1. `enqueue` appends to the back of the queue
//! 2. `pump` hands out the head only when nothing is speaking
//! 3. The caller streams it, then calls `finish(id)` and pumps again

use std::collections::VecDeque;

/// One translated string bound for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub language: String,
}

#[derive(Debug, Default)]
pub struct SpeechPlaybackQueue {
    queue: VecDeque<Utterance>,
    speaking: Option<u64>,
    next_id: u64,
}

impl SpeechPlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a translated string; returns its utterance id.
    pub fn enqueue(&mut self, text: String, language: String) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.queue.push_back(Utterance { id, text, language });
        id
    }

    /// Start the next utterance if idle. Returns `None` while speaking or when empty.
    pub fn pump(&mut self) -> Option<Utterance> {
        if self.speaking.is_some() {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.speaking = Some(next.id);
        Some(next)
    }

    /// Mark utterance `id` done. Returns false if it was not the current one.
    pub fn finish(&mut self, id: u64) -> bool {
        if self.speaking == Some(id) {
            self.speaking = None;
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.speaking = None;
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    /// Id of the utterance being spoken, if any.
    pub fn current(&self) -> Option<u64> {
        self.speaking
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
