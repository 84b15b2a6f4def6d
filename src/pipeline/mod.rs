//! # Session Pipeline Stages
//!
//! Pure, timer-free state machines for the text side of a session. The
//! session actor drives them and performs all I/O:
//!
//! final transcript → [`TranscriptAggregator`] → segment → [`TranslationDispatcher`]
//! → translated text → [`SpeechPlaybackQueue`] → synthesis

pub mod aggregator;
pub mod dispatcher;
pub mod playback;

pub use aggregator::{AggregatorAction, TranscriptAggregator};
pub use dispatcher::{Segment, TranslationDispatcher};
pub use playback::SpeechPlaybackQueue;
