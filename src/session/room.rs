//! # Room Registry
//!
//! Membership and broadcast fan-out, the only state shared across sessions.
//! Each [`Room`] owns its member → declared language map; there is no
//! process-wide language table.
//!
//! The registry also tracks every connected session. A session's id doubles
//! as its personal room, so direct messages and presence announcements reach
//! it without it joining anything.
//!
//! Sessions live on different actix worker threads, so the registry sits
//! behind a `parking_lot::RwLock`. Broadcasts copy the recipient list out of
//! the lock before delivering.

use crate::protocol::ServerEvent;
use actix::Recipient;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Clone)]
struct Member {
    id: String,
    language: String,
    outbox: Recipient<ServerEvent>,
}

/// One room: members in join order.
#[derive(Default)]
pub struct Room {
    members: Vec<Member>,
}

impl Room {
    fn position(&self, member: &str) -> Option<usize> {
        self.members.iter().position(|m| m.id == member)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Language to translate `speaker` into: the first other member in join order.
    ///
    /// Falls back to `default` when the speaker is alone or the peer declared nothing.
    pub fn peer_language(&self, speaker: &str, default: &str) -> String {
        self.members
            .iter()
            .find(|m| m.id != speaker)
            .map(|m| m.language.trim())
            .filter(|language| !language.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    pub id: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room: String,
    pub members: Vec<MemberSummary>,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    clients: RwLock<HashMap<String, Recipient<ServerEvent>>>,
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.room_count())
            .finish()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `member` to `room` (created on demand). Returns the ids of members
    /// already present. Joining twice only refreshes language and outbox.
    pub fn join(
        &self,
        room: &str,
        member: &str,
        language: &str,
        outbox: Recipient<ServerEvent>,
    ) -> Vec<String> {
        let mut rooms = self.rooms.write();
        let entry = rooms.entry(room.to_string()).or_default();

        let peers = entry
            .members
            .iter()
            .filter(|m| m.id != member)
            .map(|m| m.id.clone())
            .collect();

        match entry.position(member) {
            Some(index) => {
                entry.members[index].language = language.to_string();
                entry.members[index].outbox = outbox;
            }
            None => entry.members.push(Member {
                id: member.to_string(),
                language: language.to_string(),
                outbox,
            }),
        }
        peers
    }

    /// Remove `member`; empty rooms are deleted. Returns false if it was not a member.
    pub fn leave(&self, room: &str, member: &str) -> bool {
        let mut rooms = self.rooms.write();
        let Some(entry) = rooms.get_mut(room) else {
            return false;
        };
        let Some(index) = entry.position(member) else {
            return false;
        };
        entry.members.remove(index);
        if entry.is_empty() {
            rooms.remove(room);
        }
        true
    }

    pub fn set_language(&self, room: &str, member: &str, language: &str) -> bool {
        let mut rooms = self.rooms.write();
        let Some(target) = rooms
            .get_mut(room)
            .and_then(|entry| entry.members.iter_mut().find(|m| m.id == member))
        else {
            return false;
        };
        target.language = language.to_string();
        true
    }

    pub fn peer_language(&self, room: &str, speaker: &str, default: &str) -> String {
        self.rooms
            .read()
            .get(room)
            .map(|entry| entry.peer_language(speaker, default))
            .unwrap_or_else(|| default.to_string())
    }

    #[cfg(test)]
    pub fn is_member(&self, room: &str, member: &str) -> bool {
        self.rooms
            .read()
            .get(room)
            .map_or(false, |entry| entry.position(member).is_some())
    }

    /// Deliver `event` to every member of `room` except `except`. Returns the
    /// number of recipients.
    pub fn broadcast(&self, room: &str, except: Option<&str>, event: ServerEvent) -> usize {
        let recipients: Vec<Recipient<ServerEvent>> = {
            let rooms = self.rooms.read();
            match rooms.get(room) {
                Some(entry) => entry
                    .members
                    .iter()
                    .filter(|m| Some(m.id.as_str()) != except)
                    .map(|m| m.outbox.clone())
                    .collect(),
                None => return 0,
            }
        };

        for recipient in &recipients {
            recipient.do_send(event.clone());
        }
        recipients.len()
    }

    /// Register a connected session under its personal room.
    pub fn connect(&self, member: &str, outbox: Recipient<ServerEvent>) {
        self.clients.write().insert(member.to_string(), outbox);
    }

    pub fn disconnect(&self, member: &str) -> bool {
        self.clients.write().remove(member).is_some()
    }

    /// Deliver `event` to every connected session except `except`.
    pub fn broadcast_all(&self, except: Option<&str>, event: ServerEvent) -> usize {
        let recipients: Vec<Recipient<ServerEvent>> = self
            .clients
            .read()
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != except)
            .map(|(_, outbox)| outbox.clone())
            .collect();

        for recipient in &recipients {
            recipient.do_send(event.clone());
        }
        recipients.len()
    }

    /// Deliver `event` to everyone `room` addresses: its members, plus the
    /// session whose personal room it is. Nobody receives it twice.
    pub fn deliver(&self, room: &str, event: ServerEvent) -> usize {
        let mut recipients: Vec<(String, Recipient<ServerEvent>)> = self
            .rooms
            .read()
            .get(room)
            .map(|entry| {
                entry
                    .members
                    .iter()
                    .map(|m| (m.id.clone(), m.outbox.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if !recipients.iter().any(|(id, _)| id == room) {
            if let Some(outbox) = self.clients.read().get(room) {
                recipients.push((room.to_string(), outbox.clone()));
            }
        }

        for (_, recipient) in &recipients {
            recipient.do_send(event.clone());
        }
        recipients.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn snapshot(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.read();
        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .map(|(name, entry)| RoomSummary {
                room: name.clone(),
                members: entry
                    .members
                    .iter()
                    .map(|m| MemberSummary {
                        id: m.id.clone(),
                        language: m.language.clone(),
                    })
                    .collect(),
            })
            .collect();
        summaries.sort_by(|a, b| a.room.cmp(&b.room));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{collector, settle};

    #[actix_web::test]
    async fn test_join_reports_existing_peers() {
        let registry = RoomRegistry::new();
        let (alice, _) = collector();
        let (bob, _) = collector();

        assert!(registry.join("r1", "alice", "English", alice.clone()).is_empty());
        assert_eq!(registry.join("r1", "bob", "Hindi", bob), vec!["alice".to_string()]);
        // Re-join refreshes, does not duplicate
        assert_eq!(registry.join("r1", "alice", "French", alice), vec!["bob".to_string()]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].members.len(), 2);
        assert_eq!(snapshot[0].members[0].language, "French");
    }

    #[actix_web::test]
    async fn test_peer_language_uses_first_other_member() {
        let registry = RoomRegistry::new();
        let (a, _) = collector();
        let (b, _) = collector();
        let (c, _) = collector();

        registry.join("r1", "a", "English", a);
        assert_eq!(registry.peer_language("r1", "a", "English"), "English");

        registry.join("r1", "b", "Hindi", b);
        registry.join("r1", "c", "Spanish", c);
        assert_eq!(registry.peer_language("r1", "a", "English"), "Hindi");
        assert_eq!(registry.peer_language("r1", "b", "English"), "English");
        assert_eq!(registry.peer_language("r1", "c", "English"), "English");

        assert!(registry.set_language("r1", "a", "Tamil"));
        assert_eq!(registry.peer_language("r1", "b", "English"), "Tamil");
        assert_eq!(registry.peer_language("missing", "a", "English"), "English");
    }

    #[actix_web::test]
    async fn test_broadcast_skips_sender() {
        let registry = RoomRegistry::new();
        let (a, a_events) = collector();
        let (b, b_events) = collector();
        registry.join("r1", "a", "English", a);
        registry.join("r1", "b", "Hindi", b);

        let delivered = registry.broadcast(
            "r1",
            Some("a"),
            ServerEvent::Silence {
                user: "a".to_string(),
            },
        );
        assert_eq!(delivered, 1);
        assert_eq!(registry.broadcast("nowhere", None, ServerEvent::Ping { timestamp: 0 }), 0);

        settle().await;
        assert!(a_events.lock().is_empty());
        assert_eq!(b_events.lock().len(), 1);
    }

    #[actix_web::test]
    async fn test_broadcast_all_reaches_every_connected_session() {
        let registry = RoomRegistry::new();
        let (a, a_events) = collector();
        let (b, b_events) = collector();
        let (c, c_events) = collector();
        registry.connect("a", a);
        registry.connect("b", b.clone());
        registry.connect("c", c);
        registry.join("r1", "b", "Hindi", b);

        assert_eq!(registry.broadcast_all(Some("a"), ServerEvent::UserActive("a".to_string())), 2);
        assert!(registry.disconnect("c"));
        assert!(!registry.disconnect("c"));
        assert_eq!(registry.broadcast_all(Some("a"), ServerEvent::UserDeactive("a".to_string())), 1);

        settle().await;
        assert!(a_events.lock().is_empty());
        assert_eq!(b_events.lock().len(), 2);
        assert_eq!(c_events.lock().len(), 1);
        // Connected sessions are not rooms
        assert_eq!(registry.room_count(), 1);
    }

    #[actix_web::test]
    async fn test_deliver_addresses_rooms_and_personal_rooms() {
        let registry = RoomRegistry::new();
        let (a, a_events) = collector();
        let (b, b_events) = collector();
        registry.connect("a", a.clone());
        registry.connect("b", b.clone());
        registry.join("r1", "a", "English", a);
        registry.join("r1", "b", "Hindi", b);

        let message = |text: &str| ServerEvent::IncomingMessage {
            room: "r1".to_string(),
            from: "a".to_string(),
            message: text.to_string(),
        };
        assert_eq!(registry.deliver("r1", message("to the room")), 2);
        assert_eq!(registry.deliver("b", message("to b only")), 1);
        assert_eq!(registry.deliver("nowhere", message("lost")), 0);

        settle().await;
        assert_eq!(a_events.lock().len(), 1);
        assert_eq!(b_events.lock().len(), 2);
    }

    #[actix_web::test]
    async fn test_empty_rooms_are_removed() {
        let registry = RoomRegistry::new();
        let (a, _) = collector();
        registry.join("r1", "a", "English", a);
        assert!(registry.is_member("r1", "a"));

        assert!(registry.leave("r1", "a"));
        assert!(!registry.leave("r1", "a"));
        assert_eq!(registry.room_count(), 0);
    }
}
