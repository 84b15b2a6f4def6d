//! # Transcript Aggregator
//!
//! Turns a stream of final recognizer fragments into complete segments.
//!
//! ## State Machine:
//! ```text
//! Idle ──fragment──► Accumulating ──terminal mark──► (Flushing) ──► Idle
//!                        │  ▲
//!                        └──┘ non-terminal fragment: reschedule idle flush
//! ```
//!
//! The aggregator itself holds no timer. It tells the caller what to do
//! ([`AggregatorAction`]) and the session actor owns the single idle-flush
//! timer, replacing it on every fragment.

/// Marks that end a sentence: ASCII plus CJK, Devanagari, Arabic and ellipsis equivalents.
const TERMINAL_MARKS: &[char] = &['.', '?', '!', '。', '？', '！', '।', '॥', '؟', '…'];

/// Closing quotes and brackets that may follow the terminal mark.
const TRAILING_CLOSERS: &[char] = &['"', '\'', ')', ']', '»', '”', '’', '」', '』'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Idle,
    Accumulating,
}

/// What the caller must do after a fragment was pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorAction {
    /// Fragment was empty after trimming
    Ignored,
    /// Segment is complete: cancel any pending idle flush and translate it
    Flush(String),
    /// Segment still open: (re)start the idle flush timer
    ScheduleIdleFlush,
}

#[derive(Debug)]
pub struct TranscriptAggregator {
    buffer: String,
    state: AggregatorState,
    segments_flushed: u64,
}

impl Default for TranscriptAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: AggregatorState::Idle,
            segments_flushed: 0,
        }
    }

    /// Append one final fragment.
    pub fn push_final(&mut self, fragment: &str) -> AggregatorAction {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return AggregatorAction::Ignored;
        }

        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(fragment);
        self.state = AggregatorState::Accumulating;

        if ends_sentence(fragment) {
            match self.flush() {
                Some(segment) => AggregatorAction::Flush(segment),
                None => AggregatorAction::Ignored,
            }
        } else {
            AggregatorAction::ScheduleIdleFlush
        }
    }

    /// Take the buffered segment (idle timer fired, or a terminal mark arrived).
    ///
    /// An empty buffer yields `None` and leaves the state at `Idle`.
    pub fn flush(&mut self) -> Option<String> {
        let segment = self.buffer.trim().to_string();
        self.buffer.clear();
        self.state = AggregatorState::Idle;

        if segment.is_empty() {
            None
        } else {
            self.segments_flushed += 1;
            Some(segment)
        }
    }

    /// Drop buffered text without producing a segment (disconnect).
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.state = AggregatorState::Idle;
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn pending_text(&self) -> &str {
        &self.buffer
    }

    pub fn segments_flushed(&self) -> u64 {
        self.segments_flushed
    }
}

/// Whether a trimmed fragment ends in a sentence-terminal mark.
pub fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(TRAILING_CLOSERS)
        .chars()
        .next_back()
        .map_or(false, |c| TERMINAL_MARKS.contains(&c))
}
