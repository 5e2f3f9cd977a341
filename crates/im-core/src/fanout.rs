//! Translates one logical event (a chat message, a friend operation,
//! a presence change) into concrete sends to live sessions plus
//! buffer appends for recipients who are not connected.

use bytes::Bytes;

use crate::model::{User, UserId};
use crate::offline::{OfflineBuffer, Queue};
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct FanoutEngine {
    registry: SessionRegistry,
    offline: OfflineBuffer,
    group_id_boundary: i32,
}

impl FanoutEngine {
    pub fn new(registry: SessionRegistry, offline: OfflineBuffer, group_id_boundary: i32) -> Self {
        Self { registry, offline, group_id_boundary }
    }

    pub fn is_group(&self, id: i32) -> bool {
        id >= self.group_id_boundary
    }

    /// Sends to every live session of `user_id`; if none is live,
    /// appends to `queue` instead. Holds the same per-user guard a
    /// concurrent login serializes its insert-then-drain under, so
    /// this check-then-buffer can't straddle a login's visibility
    /// change and strand the frame.
    pub async fn deliver_or_buffer(&self, queue: Queue, user_id: UserId, frame: Bytes) {
        let _guard = self.registry.lock_user(user_id).await;
        let sessions = self.registry.sessions_of(user_id).await;
        if sessions.is_empty() {
            self.offline.append(queue, user_id, frame).await;
        } else {
            for session in sessions {
                session.send(frame.clone());
            }
        }
    }

    /// Sends only to live sessions; silently drops for an offline
    /// recipient. Used for screenshot/remote-desktop frames and the
    /// reciprocal friend/group-leave notice, neither of which is
    /// buffered.
    pub async fn deliver_if_online(&self, user_id: UserId, frame: Bytes) {
        for session in self.registry.sessions_of(user_id).await {
            session.send(frame.clone());
        }
    }

    /// A chat send to a single non-group target: live sessions get it
    /// directly, otherwise it is buffered in the chat queue.
    pub async fn chat_unicast(&self, target: UserId, frame: Bytes) {
        self.deliver_or_buffer(Queue::Chat, target, frame).await;
    }

    /// A chat send to every member of a group other than the sender.
    pub async fn chat_groupcast(&self, sender: UserId, members: &[User], frame: Bytes) {
        for member in members {
            if member.user_id == sender {
                continue;
            }
            self.deliver_or_buffer(Queue::Chat, member.user_id, frame.clone()).await;
        }
    }

    /// Presence broadcasts are never buffered: a user who was offline
    /// when a friend's status changed learns the current state from
    /// the friend list on their own next login, not from a queued
    /// notice.
    pub async fn presence_broadcast(&self, friends: &[User], frame: Bytes) {
        for friend in friends {
            self.deliver_if_online(friend.user_id, frame.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn engine() -> FanoutEngine {
        FanoutEngine::new(SessionRegistry::new(), OfflineBuffer::new(16), 1_000_000)
    }

    #[tokio::test]
    async fn unicast_to_offline_user_is_buffered() {
        let engine = engine();
        engine.chat_unicast(7, Bytes::from_static(b"hi")).await;
        assert_eq!(engine.offline.depth_of(7).await, (0, 1));
    }

    #[tokio::test]
    async fn unicast_to_online_user_is_sent_not_buffered() {
        let engine = engine();
        let mut session = Session::new(1);
        engine.registry.insert(7, 1, 0, session.handle()).await;
        engine.chat_unicast(7, Bytes::from_static(b"hi")).await;
        assert_eq!(engine.offline.depth_of(7).await, (0, 0));
        assert!(session.outbound_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn groupcast_skips_the_sender() {
        let engine = engine();
        let mut s3 = Session::new(1);
        let mut s4 = Session::new(2);
        engine.registry.insert(3, 1, 0, s3.handle()).await;
        engine.registry.insert(4, 1, 0, s4.handle()).await;
        let members = vec![
            User { user_id: 3, ..test_user() },
            User { user_id: 4, ..test_user() },
        ];
        engine.chat_groupcast(3, &members, Bytes::from_static(b"hello")).await;
        assert!(s3.outbound_rx.try_recv().is_err());
        assert!(s4.outbound_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn deliver_if_online_drops_silently_when_offline() {
        let engine = engine();
        engine.deliver_if_online(99, Bytes::from_static(b"shot")).await;
        assert_eq!(engine.offline.depth_of(99).await, (0, 0));
    }

    fn test_user() -> User {
        User {
            user_id: 0,
            username: String::new(),
            password: String::new(),
            nickname: String::new(),
            face_type: 0,
            custom_face: String::new(),
            gender: 0,
            birthday: String::new(),
            signature: String::new(),
            address: String::new(),
            phone_number: String::new(),
            mail: String::new(),
        }
    }
}
