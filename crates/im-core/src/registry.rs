//! Process-wide index of live sessions, keyed by user id and then by
//! client kind. Exclusive writers, concurrent readers, per the
//! `Arc<RwLock<HashMap<..>>>` registries used elsewhere for indexing
//! live connections by identity.

use std::collections::HashMap;
use std::sync::Arc;

use im_protocol::Command;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::{ClientKind, UserId};
use crate::session::SessionHandle;

/// Last known presence for a user: its display status and the kind
/// of client that most recently reported it. Tracked per user, not
/// per session — a user online from two client kinds at once still
/// has one status value, matching how the user record itself stores
/// a single `status` field.
#[derive(Debug, Clone, Copy)]
pub struct Presence {
    pub status: i32,
    pub client_kind: ClientKind,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<UserId, HashMap<ClientKind, SessionHandle>>>>,
    presence: Arc<RwLock<HashMap<UserId, Presence>>>,
    user_locks: Arc<RwLock<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle` as the session for `(user_id, client_kind)`
    /// and records its presence. If a session already occupies that
    /// slot it is marked invalid, sent a `kickUser` frame, and
    /// evicted first — best-effort: the old session's queue may
    /// already be gone.
    pub async fn insert(
        &self,
        user_id: UserId,
        client_kind: ClientKind,
        status: i32,
        handle: SessionHandle,
    ) {
        let mut guard = self.inner.write().await;
        let bucket = guard.entry(user_id).or_default();
        if let Some(old) = bucket.remove(&client_kind) {
            old.mark_invalid();
            let kick = Command::KickUser;
            let frame = im_protocol::Packet::encode(kick, 0, &[], &[]).into_bytes().freeze();
            old.send(frame);
            tracing::info!(user_id, client_kind, old_session = old.id, "kicked duplicate login");
        }
        bucket.insert(client_kind, handle);
        drop(guard);
        self.presence.write().await.insert(user_id, Presence { status, client_kind });
    }

    /// Updates the status half of a user's presence without
    /// disturbing which sessions are on record for them.
    pub async fn set_status(&self, user_id: UserId, status: i32) {
        if let Some(presence) = self.presence.write().await.get_mut(&user_id) {
            presence.status = status;
        }
    }

    pub async fn presence_of(&self, user_id: UserId) -> Option<Presence> {
        self.presence.read().await.get(&user_id).copied()
    }

    /// Removes a session if it is still the one on record for that
    /// slot. A session evicted by a more recent login must not
    /// remove the new one on its own cleanup path.
    pub async fn remove(&self, user_id: UserId, client_kind: ClientKind, session_id: u64) {
        let mut guard = self.inner.write().await;
        let mut now_empty = false;
        if let Some(bucket) = guard.get_mut(&user_id) {
            let still_current = bucket.get(&client_kind).is_some_and(|h| h.id == session_id);
            if still_current {
                bucket.remove(&client_kind);
            }
            now_empty = bucket.is_empty();
            if now_empty {
                guard.remove(&user_id);
            }
        }
        drop(guard);
        if now_empty {
            self.presence.write().await.remove(&user_id);
        }
    }

    pub async fn sessions_of(&self, user_id: UserId) -> Vec<SessionHandle> {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn session_of_kind(
        &self,
        user_id: UserId,
        client_kind: ClientKind,
    ) -> Option<SessionHandle> {
        self.inner
            .read()
            .await
            .get(&user_id)
            .and_then(|bucket| bucket.get(&client_kind).cloned())
    }

    /// Serializes one user's (evict → become visible → drain offline
    /// buffer) login sequence against concurrent fan-out sends for
    /// the same user. Without this, a sender can observe the user
    /// offline and a login's drain can both run around the same
    /// insert, and whichever one of "append to the buffer" and
    /// "drain the buffer" runs second leaves the frame stranded until
    /// the user's next login. Holding this guard across both steps on
    /// either side makes the two sequences mutually exclusive per
    /// user, so a concurrent sender either buffers into a state the
    /// pending drain will still observe, or finds the session already
    /// registered and delivers to it directly.
    pub async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let guard = self.user_locks.read().await;
            guard.get(&user_id).cloned()
        };
        let lock = match lock {
            Some(lock) => lock,
            None => {
                let mut guard = self.user_locks.write().await;
                guard.entry(user_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
            }
        };
        lock.lock_owned().await
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .read()
            .await
            .get(&user_id)
            .is_some_and(|bucket| !bucket.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[tokio::test]
    async fn insert_then_lookup_returns_the_session() {
        let registry = SessionRegistry::new();
        let session = Session::new(1);
        registry.insert(42, 1, 3, session.handle()).await;
        assert!(registry.is_online(42).await);
        assert!(registry.session_of_kind(42, 1).await.is_some());
        assert_eq!(registry.presence_of(42).await.unwrap().status, 3);
    }

    #[tokio::test]
    async fn duplicate_login_kicks_the_old_session() {
        let registry = SessionRegistry::new();
        let mut old = Session::new(1);
        registry.insert(42, 1, 1, old.handle()).await;

        let new = Session::new(2);
        registry.insert(42, 1, 1, new.handle()).await;

        let current = registry.session_of_kind(42, 1).await.unwrap();
        assert_eq!(current.id, 2);
        assert!(!old.handle().is_valid());

        let kicked = old.outbound_rx.try_recv().expect("old session should receive a kick frame");
        let packet = im_protocol::Packet::decode(&kicked).unwrap();
        assert_eq!(packet.cmd, Command::KickUser);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_ignores_stale_session_id() {
        let registry = SessionRegistry::new();
        let session = Session::new(1);
        registry.insert(42, 1, 0, session.handle()).await;

        // Removing with a stale id (as if an evicted session's
        // cleanup ran after a newer login) must not remove the
        // current session.
        registry.remove(42, 1, 999).await;
        assert!(registry.is_online(42).await);

        registry.remove(42, 1, 1).await;
        assert!(!registry.is_online(42).await);
        assert!(registry.presence_of(42).await.is_none());
        registry.remove(42, 1, 1).await; // idempotent
    }

    #[tokio::test]
    async fn lock_user_serializes_same_user_but_not_different_users() {
        let registry = SessionRegistry::new();
        let guard_a = registry.lock_user(1).await;

        // A different user's guard must not be blocked by user 1's.
        let registry2 = registry.clone();
        tokio::time::timeout(std::time::Duration::from_millis(100), async move {
            registry2.lock_user(2).await
        })
        .await
        .expect("a different user's lock must not contend");

        // The same user's second guard must wait for the first to drop.
        let registry3 = registry.clone();
        let waiter = tokio::spawn(async move { registry3.lock_user(1).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished(), "second guard for the same user should still be waiting");
        drop(guard_a);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn sessions_of_returns_every_client_kind() {
        let registry = SessionRegistry::new();
        registry.insert(42, 1, 0, Session::new(1).handle()).await;
        registry.insert(42, 2, 0, Session::new(2).handle()).await;
        let sessions = registry.sessions_of(42).await;
        assert_eq!(sessions.len(), 2);
    }
}
