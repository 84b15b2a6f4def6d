//! Per-client sessions and the structures they share.

pub mod controller;
pub mod link;
pub mod manager;
pub mod room;

#[cfg(test)]
pub mod testing;

pub use controller::{AudioFrame, ClientCommand, Disconnect, SessionController};
