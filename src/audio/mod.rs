//! # Audio Handling
//!
//! Byte-level audio plumbing shared by the session pipeline.
//!
//! ## Key Components:
//! - **Audio Batcher**: coalesces inbound client frames before they reach the recognizer
//! - **Chunk Reassembler**: keeps relayed and synthesized audio on whole-sample boundaries
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM, little-endian
//! - **Channels**: Mono (1 channel)

pub mod batcher;
pub mod reassembler;

pub use batcher::AudioBatcher;
pub use reassembler::ChunkReassembler;

pub const SAMPLE_RATE: u32 = 16_000;
pub const CHANNELS: u8 = 1;
