//! In-memory per-user offline buffer: two FIFOs (`notify`, `chat`)
//! holding already-encoded frames for users with no live session.
//! Drained atomically on login, notify frames first so the client
//! sees relationship/group changes before the messages that
//! reference them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::model::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Notify,
    Chat,
}

#[derive(Default)]
struct PerUserQueues {
    notify: VecDeque<Bytes>,
    chat: VecDeque<Bytes>,
}

#[derive(Clone)]
pub struct OfflineBuffer {
    depth: usize,
    inner: Arc<RwLock<HashMap<UserId, PerUserQueues>>>,
}

impl OfflineBuffer {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn append(&self, queue: Queue, user_id: UserId, frame: Bytes) {
        let mut guard = self.inner.write().await;
        let bucket = guard.entry(user_id).or_default();
        let target = match queue {
            Queue::Notify => &mut bucket.notify,
            Queue::Chat => &mut bucket.chat,
        };
        if target.len() >= self.depth {
            target.pop_front();
            tracing::warn!(user_id, ?queue, "offline buffer full, dropping oldest entry");
        }
        target.push_back(frame);
    }

    /// Empties both queues for `user_id` and returns their contents,
    /// notify entries before chat entries.
    pub async fn drain(&self, user_id: UserId) -> Vec<Bytes> {
        let mut guard = self.inner.write().await;
        let Some(mut bucket) = guard.remove(&user_id) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(bucket.notify.len() + bucket.chat.len());
        out.extend(bucket.notify.drain(..));
        out.extend(bucket.chat.drain(..));
        out
    }

    pub async fn depth_of(&self, user_id: UserId) -> (usize, usize) {
        let guard = self.inner.read().await;
        guard
            .get(&user_id)
            .map(|b| (b.notify.len(), b.chat.len()))
            .unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: &'static str) -> Bytes {
        Bytes::from_static(tag.as_bytes())
    }

    #[tokio::test]
    async fn fifo_order_is_preserved_within_a_queue() {
        let buf = OfflineBuffer::new(16);
        buf.append(Queue::Chat, 7, frame("a")).await;
        buf.append(Queue::Chat, 7, frame("b")).await;
        let drained = buf.drain(7).await;
        assert_eq!(drained, vec![frame("a"), frame("b")]);
    }

    #[tokio::test]
    async fn notify_entries_precede_chat_entries_on_drain() {
        let buf = OfflineBuffer::new(16);
        buf.append(Queue::Chat, 7, frame("chat1")).await;
        buf.append(Queue::Notify, 7, frame("notify1")).await;
        let drained = buf.drain(7).await;
        assert_eq!(drained, vec![frame("notify1"), frame("chat1")]);
    }

    #[tokio::test]
    async fn drain_empties_the_queues() {
        let buf = OfflineBuffer::new(16);
        buf.append(Queue::Chat, 7, frame("a")).await;
        assert_eq!(buf.drain(7).await.len(), 1);
        assert_eq!(buf.drain(7).await.len(), 0);
        assert_eq!(buf.depth_of(7).await, (0, 0));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_entry() {
        let buf = OfflineBuffer::new(2);
        buf.append(Queue::Chat, 7, frame("a")).await;
        buf.append(Queue::Chat, 7, frame("b")).await;
        buf.append(Queue::Chat, 7, frame("c")).await;
        let drained = buf.drain(7).await;
        assert_eq!(drained, vec![frame("b"), frame("c")]);
    }
}
