//! Write-command capture and fan-out to attached replica links, per §4.9.
//!
//! `rredis`'s `src/redis/client.rs` already tags a connection as a
//! replication link via `ClientFlags::SLAVE`/`MASTER` and carries a
//! `repl_state: ReplState` field, and `src/redis/config.rs` parses
//! `replicaof` out of `redis.conf`; this repository's `--replicaof` flag
//! (see `src/config.rs`) plays the same server-mode role. The capture log
//! itself has no direct teacher counterpart — `rredis`'s AOF/RDB files
//! (`src/aof.rs`, `src/rdb.rs`) persist to disk rather than fan out live —
//! so the append-and-cursor shape here follows the same "each reader owns
//! its own position into a shared append-only buffer" idea as this
//! repository's own `store::stream`, reused because captured writes and
//! stream entries are both "append once, deliver once per reader,
//! in order".

use crate::resp::{Argv, Reply};
use crate::session::{ClientId, Outbox};
use std::sync::RwLock;

#[derive(Default)]
pub struct ReplicationLog {
    frames: RwLock<Vec<Argv>>,
    links: RwLock<Vec<ReplicaLink>>,
}

struct ReplicaLink {
    client: ClientId,
    outbox: Outbox,
    cursor: usize,
}

impl ReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a captured write, then immediately drains it to every
    /// attached link so replication order matches commit order.
    pub fn capture(&self, argv: Argv) {
        {
            let mut frames = self.frames.write().unwrap();
            frames.push(argv);
        }
        self.drain_links();
    }

    /// Attaches a replica link starting at the current tail of the log
    /// (only frames captured after this call are streamed to it).
    pub fn attach(&self, client: ClientId, outbox: Outbox) {
        let cursor = self.frames.read().unwrap().len();
        self.links.write().unwrap().push(ReplicaLink { client, outbox, cursor });
    }

    pub fn detach(&self, client: ClientId) {
        self.links.write().unwrap().retain(|l| l.client != client);
    }

    fn drain_links(&self) {
        let frames = self.frames.read().unwrap();
        let mut links = self.links.write().unwrap();
        links.retain_mut(|link| {
            while link.cursor < frames.len() {
                let frame = &frames[link.cursor];
                let encoded =
                    Reply::Array(frame.iter().map(|a| Reply::Bulk(a.clone())).collect()).encode_to_vec();
                if !link.outbox.send(encoded) {
                    return false; // link died; drop it
                }
                link.cursor += 1;
            }
            true
        });
    }

    pub fn len(&self) -> usize {
        self.frames.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attached_link_only_sees_frames_captured_after_attach() {
        let log = ReplicationLog::new();
        log.capture(vec![b"SET".to_vec(), b"pre".to_vec(), b"1".to_vec()]);

        let (outbox, mut rx) = Outbox::new();
        log.attach(ClientId::next(), outbox);
        log.capture(vec![b"SET".to_vec(), b"post".to_vec(), b"2".to_vec()]);

        let frame = rx.try_recv().unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.contains("post"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dead_link_is_detached_on_next_capture() {
        let log = ReplicationLog::new();
        let client = ClientId::next();
        let (outbox, rx) = Outbox::new();
        log.attach(client, outbox);
        drop(rx);
        log.capture(vec![b"PING".to_vec()]);
        assert_eq!(log.links.read().unwrap().len(), 0);
    }

    #[test]
    fn explicit_detach_removes_link() {
        let log = ReplicationLog::new();
        let client = ClientId::next();
        let (outbox, _rx) = Outbox::new();
        log.attach(client, outbox);
        log.detach(client);
        assert_eq!(log.links.read().unwrap().len(), 0);
    }
}
