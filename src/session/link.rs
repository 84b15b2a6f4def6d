//! # Recognizer Bridge
//!
//! Connection state of the one recognizer link a session may own.
//!
//! ## States:
//! ```text
//! Idle ──begin_open──► Connecting(g) ──connected(g)──► Connected(g)
//!  ▲                        │                              │
//!  │                     close()                        close() / fail(g)
//!  │                        ▼                              │
//!  └──────connected(g)── Closing(g) ◄──────────────────────┘ (Idle)
//! ```
//!
//! Every open attempt gets a new generation `g`. Results and events tagged
//! with an older generation belong to a replaced connection and are ignored,
//! so a slow handshake can never resurrect a link the session already gave up.

use crate::providers::{ProviderError, RecognizerCommand};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("recognizer link is already open or opening")]
    AlreadyOpen,

    #[error("recognizer link is not connected")]
    NotConnected,

    #[error("recognizer link dropped its command channel")]
    ChannelClosed,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug)]
enum LinkState {
    Idle,
    Connecting { generation: u64 },
    Connected {
        generation: u64,
        commands: UnboundedSender<RecognizerCommand>,
    },
    /// Close was requested before the handshake finished
    Closing { generation: u64 },
}

/// Outcome of a finished handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The link is now live
    Connected,
    /// Close was requested meanwhile; the connection was told to close
    ClosedEarly,
    /// Belongs to a replaced attempt; the connection was told to close
    Stale,
}

#[derive(Debug)]
pub struct RecognizerLink {
    state: LinkState,
    generation: u64,
    opens: u64,
}

impl Default for RecognizerLink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognizerLink {
    pub fn new() -> Self {
        Self {
            state: LinkState::Idle,
            generation: 0,
            opens: 0,
        }
    }

    /// Start an open attempt. Rejected while connecting or connected.
    pub fn begin_open(&mut self) -> Result<u64, LinkError> {
        match self.state {
            LinkState::Connecting { .. } | LinkState::Connected { .. } => Err(LinkError::AlreadyOpen),
            LinkState::Idle | LinkState::Closing { .. } => {
                self.generation += 1;
                self.opens += 1;
                self.state = LinkState::Connecting {
                    generation: self.generation,
                };
                Ok(self.generation)
            }
        }
    }

    /// Record a completed handshake for `generation`.
    pub fn connected(
        &mut self,
        generation: u64,
        commands: UnboundedSender<RecognizerCommand>,
    ) -> Handshake {
        match self.state {
            LinkState::Connecting { generation: current } if current == generation => {
                self.state = LinkState::Connected {
                    generation,
                    commands,
                };
                Handshake::Connected
            }
            LinkState::Closing { generation: current } if current == generation => {
                let _ = commands.send(RecognizerCommand::Close);
                self.state = LinkState::Idle;
                Handshake::ClosedEarly
            }
            _ => {
                let _ = commands.send(RecognizerCommand::Close);
                Handshake::Stale
            }
        }
    }

    /// The attempt or connection `generation` failed or was closed by the provider.
    ///
    /// Returns false when `generation` is not the current link.
    pub fn fail(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            if matches!(self.state, LinkState::Closing { generation: current } if current == generation) {
                self.state = LinkState::Idle;
            }
            return false;
        }
        self.state = LinkState::Idle;
        true
    }

    /// Forward one audio batch. On failure the link is reset to `Idle`.
    pub fn send_audio(&mut self, batch: Vec<u8>) -> Result<(), (LinkError, Vec<u8>)> {
        let LinkState::Connected { commands, .. } = &self.state else {
            return Err((LinkError::NotConnected, batch));
        };

        match commands.send(RecognizerCommand::Audio(batch)) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = LinkState::Idle;
                let batch = match err.0 {
                    RecognizerCommand::Audio(batch) => batch,
                    _ => Vec::new(),
                };
                Err((LinkError::ChannelClosed, batch))
            }
        }
    }

    pub fn keep_alive(&mut self) -> Result<(), LinkError> {
        let LinkState::Connected { commands, .. } = &self.state else {
            return Err(LinkError::NotConnected);
        };
        if commands.send(RecognizerCommand::KeepAlive).is_err() {
            self.state = LinkState::Idle;
            return Err(LinkError::ChannelClosed);
        }
        Ok(())
    }

    /// Close the link. Always leaves it not connected.
    ///
    /// Returns true if a live or opening link was closed.
    pub fn close(&mut self) -> bool {
        match std::mem::replace(&mut self.state, LinkState::Idle) {
            LinkState::Connected { commands, .. } => {
                let _ = commands.send(RecognizerCommand::Close);
                true
            }
            LinkState::Connecting { generation } => {
                self.state = LinkState::Closing { generation };
                true
            }
            LinkState::Closing { generation } => {
                self.state = LinkState::Closing { generation };
                false
            }
            LinkState::Idle => false,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        match self.state {
            LinkState::Connecting { generation: current }
            | LinkState::Connected { generation: current, .. } => current == generation,
            LinkState::Idle | LinkState::Closing { .. } => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state, LinkState::Connecting { .. })
    }

    /// Whether `generation` is still waiting on its handshake.
    pub fn is_connecting_generation(&self, generation: u64) -> bool {
        matches!(self.state, LinkState::Connecting { generation: current } if current == generation)
    }

    /// Connections opened over the session's lifetime.
    pub fn opens(&self) -> u64 {
        self.opens
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            LinkState::Idle => "idle",
            LinkState::Connecting { .. } => "connecting",
            LinkState::Connected { .. } => "connected",
            LinkState::Closing { .. } => "closing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_double_open_is_rejected() {
        let mut link = RecognizerLink::new();
        let generation = link.begin_open().unwrap();
        assert!(matches!(link.begin_open(), Err(LinkError::AlreadyOpen)));

        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(link.connected(generation, tx), Handshake::Connected);
        assert!(matches!(link.begin_open(), Err(LinkError::AlreadyOpen)));
        assert_eq!(link.opens(), 1);
    }

    #[test]
    fn test_send_audio_and_close() {
        let mut link = RecognizerLink::new();
        let generation = link.begin_open().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        link.connected(generation, tx);

        link.send_audio(vec![1, 2, 3, 4]).unwrap();
        link.keep_alive().unwrap();
        assert!(link.close());
        assert!(!link.is_connected());
        assert_eq!(link.state_name(), "idle");

        assert_eq!(rx.try_recv().unwrap(), RecognizerCommand::Audio(vec![1, 2, 3, 4]));
        assert_eq!(rx.try_recv().unwrap(), RecognizerCommand::KeepAlive);
        assert_eq!(rx.try_recv().unwrap(), RecognizerCommand::Close);
    }

    #[test]
    fn test_send_on_dead_channel_returns_batch() {
        let mut link = RecognizerLink::new();
        let generation = link.begin_open().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        link.connected(generation, tx);
        drop(rx);

        let (err, batch) = link.send_audio(vec![9, 9]).unwrap_err();
        assert!(matches!(err, LinkError::ChannelClosed));
        assert_eq!(batch, vec![9, 9]);
        assert!(!link.is_connected());
    }

    #[test]
    fn test_close_while_connecting_closes_on_handshake() {
        let mut link = RecognizerLink::new();
        let generation = link.begin_open().unwrap();
        assert!(link.close());
        assert_eq!(link.state_name(), "closing");
        assert!(!link.is_connected());

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(link.connected(generation, tx), Handshake::ClosedEarly);
        assert_eq!(rx.try_recv().unwrap(), RecognizerCommand::Close);
        assert_eq!(link.state_name(), "idle");
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut link = RecognizerLink::new();
        let old = link.begin_open().unwrap();
        link.close();
        let new = link.begin_open().unwrap();
        assert_ne!(old, new);

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(link.connected(old, tx), Handshake::Stale);
        assert_eq!(rx.try_recv().unwrap(), RecognizerCommand::Close);
        assert!(link.is_connecting_generation(new));
        assert!(!link.fail(old));
        assert!(link.fail(new));
        assert_eq!(link.state_name(), "idle");
    }

    #[test]
    fn test_send_without_link() {
        let mut link = RecognizerLink::new();
        let (err, batch) = link.send_audio(vec![1, 2]).unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(batch, vec![1, 2]);
        assert!(matches!(link.keep_alive(), Err(LinkError::NotConnected)));
    }
}
