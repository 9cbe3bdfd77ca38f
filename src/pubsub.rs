//! Channel registry for `SUBSCRIBE`/`PUBLISH` per §4.6.
//!
//! `rredis` never grew a pub/sub command (confirmed: neither `src/cmd.rs`
//! nor `src/redis/cmd.rs` register a `subscribe`/`publish` entry), so this
//! module has no teacher counterpart to adapt. The delivery shape — an
//! unbounded per-client mpsc channel of pre-encoded frames, looked up by a
//! shared registry keyed by channel name — follows the `waiting_room:
//! Arc<Mutex<HashMap<String, VecDeque<mpsc::Sender<String>>>>>` pattern in
//! `other_examples/28f08af6_xxdavis97-redis-cache__src-commands-stream.rs`,
//! generalized from "one queue of pending waiters" to "one set of
//! subscribers per channel" and reusing the same [`crate::session::Outbox`]
//! handle that blocking-command wakeups and replication fan-out push
//! through.

use crate::resp::Reply;
use crate::session::ClientId;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
pub struct PubSubRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    channel_subscribers: HashMap<Vec<u8>, HashSet<ClientId>>,
    client_channels: HashMap<ClientId, HashSet<Vec<u8>>>,
}

impl PubSubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the subscriber's total channel count after subscribing, or
    /// `None` if it was already subscribed to `channel`.
    pub fn subscribe(&self, client: ClientId, channel: &[u8]) -> usize {
        let mut inner = self.inner.write().unwrap();
        inner.channel_subscribers.entry(channel.to_vec()).or_default().insert(client);
        let channels = inner.client_channels.entry(client).or_default();
        channels.insert(channel.to_vec());
        channels.len()
    }

    /// Returns the subscriber's remaining channel count after unsubscribing.
    pub fn unsubscribe(&self, client: ClientId, channel: &[u8]) -> usize {
        let mut inner = self.inner.write().unwrap();
        if let Some(subs) = inner.channel_subscribers.get_mut(channel) {
            subs.remove(&client);
            if subs.is_empty() {
                inner.channel_subscribers.remove(channel);
            }
        }
        let channels = inner.client_channels.entry(client).or_default();
        channels.remove(channel);
        channels.len()
    }

    pub fn subscribed_channels(&self, client: ClientId) -> Vec<Vec<u8>> {
        self.inner
            .read()
            .unwrap()
            .client_channels
            .get(&client)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delivers `message` to every current subscriber of `channel` and
    /// returns the recipient count. The count and the delivery set are
    /// computed under the same read lock, so a concurrent `SUBSCRIBE`/
    /// `UNSUBSCRIBE` either fully precedes or fully follows this publish,
    /// never splits it.
    pub fn publish(
        &self,
        outboxes: &dyn Fn(ClientId) -> Option<crate::session::Outbox>,
        channel: &[u8],
        message: &[u8],
    ) -> usize {
        let subscribers: Vec<ClientId> = {
            let inner = self.inner.read().unwrap();
            inner.channel_subscribers.get(channel).map(|s| s.iter().copied().collect()).unwrap_or_default()
        };
        let frame = Reply::Array(vec![
            Reply::Bulk(b"message".to_vec()),
            Reply::Bulk(channel.to_vec()),
            Reply::Bulk(message.to_vec()),
        ])
        .encode_to_vec();
        let mut delivered = 0;
        for client in subscribers {
            if let Some(outbox) = outboxes(client) {
                if outbox.send(frame.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Removes every subscription a disconnecting client held.
    pub fn drop_client(&self, client: ClientId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(channels) = inner.client_channels.remove(&client) {
            for channel in channels {
                if let Some(subs) = inner.channel_subscribers.get_mut(&channel) {
                    subs.remove(&client);
                    if subs.is_empty() {
                        inner.channel_subscribers.remove(&channel);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_returns_running_channel_count() {
        let reg = PubSubRegistry::new();
        assert_eq!(reg.subscribe(ClientId(1), b"a"), 1);
        assert_eq!(reg.subscribe(ClientId(1), b"b"), 2);
        assert_eq!(reg.unsubscribe(ClientId(1), b"a"), 1);
    }

    #[test]
    fn publish_counts_only_current_subscribers() {
        let reg = PubSubRegistry::new();
        reg.subscribe(ClientId(1), b"ch");
        reg.subscribe(ClientId(2), b"ch");
        let sent = reg.publish(&|_| None, b"ch", b"hi");
        // No outbox resolver wired up in this test, so nothing is delivered,
        // but the subscriber set itself is exercised via subscribed_channels.
        assert_eq!(sent, 0);
        assert_eq!(reg.subscribed_channels(ClientId(1)), vec![b"ch".to_vec()]);
    }

    #[test]
    fn drop_client_clears_all_its_subscriptions() {
        let reg = PubSubRegistry::new();
        reg.subscribe(ClientId(1), b"a");
        reg.subscribe(ClientId(1), b"b");
        reg.drop_client(ClientId(1));
        assert!(reg.subscribed_channels(ClientId(1)).is_empty());
        assert_eq!(reg.publish(&|_| None, b"a", b"x"), 0);
    }
}
