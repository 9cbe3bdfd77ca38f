//! Per-connection state machine: `Normal` / `InMulti` / `Subscribed` /
//! `ReplicaLink`, and the outbound-frame handle other tasks use to push
//! data to a client asynchronously (pub/sub messages, blocking-command
//! wakeups are delivered in-line instead, replica fan-out frames).
//!
//! `rredis`'s `src/redis/client.rs` packs all of this into one
//! `RedisClient` struct: `flags: ClientFlags` (a bitflag tracking
//! slave/master/monitor/multi/blocked at once), `mstate: MultiState`, a
//! `reply: LinkedList<...>` write queue drained by the event loop. This
//! repository is one task per connection rather than one reactor fanning
//! out over every fd, so the mode is a plain enum instead of a bitflag (the
//! four modes are mutually exclusive here, where `rredis`'s flags could in
//! principle combine) and the reply queue becomes an
//! `mpsc::UnboundedSender` that other tasks can clone and push through
//! directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

impl ClientId {
    pub fn next() -> ClientId {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst))
    }
}

/// Cheap to clone; held by the pub/sub registry and the replication log so
/// they can push encoded frames to a client without routing through its
/// command-dispatch loop.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Outbox {
    pub fn new() -> (Outbox, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, rx)
    }

    /// Returns `false` if the client has already disconnected.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.tx.send(frame).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Normal,
    InMulti,
    Subscribed,
    ReplicaLink,
}

pub struct Session {
    pub id: ClientId,
    pub mode: Mode,
    pub name: Option<Vec<u8>>,
}

impl Session {
    pub fn new(id: ClientId) -> Self {
        Session { id, mode: Mode::Normal, name: None }
    }

    pub fn enter_multi(&mut self) {
        self.mode = Mode::InMulti;
    }

    pub fn leave_multi(&mut self) {
        if self.mode == Mode::InMulti {
            self.mode = Mode::Normal;
        }
    }

    pub fn enter_subscribed(&mut self) {
        self.mode = Mode::Subscribed;
    }

    /// `UNSUBSCRIBE`/`PUNSUBSCRIBE` down to zero channels returns a client
    /// to `Normal` per §4.10.
    pub fn leave_subscribed_if_empty(&mut self, remaining_channels: usize) {
        if self.mode == Mode::Subscribed && remaining_channels == 0 {
            self.mode = Mode::Normal;
        }
    }

    pub fn enter_replica_link(&mut self) {
        self.mode = Mode::ReplicaLink;
    }
}

/// Maps a connected client to its [`Outbox`] so the pub/sub registry and
/// the replication log can reach it without routing through that client's
/// own command-dispatch loop.
#[derive(Default)]
pub struct ClientRegistry {
    outboxes: RwLock<HashMap<ClientId, Outbox>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ClientId, outbox: Outbox) {
        self.outboxes.write().unwrap().insert(id, outbox);
    }

    pub fn unregister(&self, id: ClientId) {
        self.outboxes.write().unwrap().remove(&id);
    }

    pub fn get(&self, id: ClientId) -> Option<Outbox> {
        self.outboxes.read().unwrap().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_distinct() {
        let a = ClientId::next();
        let b = ClientId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn subscribed_returns_to_normal_only_when_empty() {
        let mut s = Session::new(ClientId::next());
        s.enter_subscribed();
        s.leave_subscribed_if_empty(1);
        assert_eq!(s.mode, Mode::Subscribed);
        s.leave_subscribed_if_empty(0);
        assert_eq!(s.mode, Mode::Normal);
    }

    #[tokio::test]
    async fn outbox_send_fails_after_receiver_dropped() {
        let (outbox, rx) = Outbox::new();
        drop(rx);
        assert!(!outbox.send(vec![1, 2, 3]));
    }

    #[test]
    fn registry_round_trips_outbox_lookup() {
        let registry = ClientRegistry::new();
        let id = ClientId::next();
        let (outbox, _rx) = Outbox::new();
        registry.register(id, outbox);
        assert!(registry.get(id).is_some());
        registry.unregister(id);
        assert!(registry.get(id).is_none());
    }
}
