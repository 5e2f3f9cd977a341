//! Per-connection session state and the outbound handle other
//! sessions use to reach it.
//!
//! A session's socket is written only by the connection task that
//! owns it. Every other caller — fan-out, a duplicate-login kick —
//! reaches the session through [`SessionHandle::outbound`], an
//! `mpsc::Sender` the connection task drains into its transport. This
//! is the session's serialisation primitive: concurrent senders never
//! touch the transport directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::model::{ClientKind, UserId};

/// Outbound queue depth before a slow or stuck peer starts shedding
/// its own fan-out traffic rather than blocking the sender.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauth,
    Auth,
    Closed,
}

/// Cloneable handle the registry stores and fan-out sends through.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: u64,
    outbound: mpsc::Sender<Bytes>,
    valid: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Enqueues a frame for delivery. Best-effort: a full or closed
    /// queue means the recipient is gone or overloaded, never a
    /// reason to fail the caller's own operation.
    pub fn send(&self, frame: Bytes) {
        if let Err(err) = self.outbound.try_send(frame) {
            tracing::warn!(session_id = self.id, error = %err, "dropping frame, outbound queue full or closed");
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

pub struct Session {
    pub id: u64,
    pub user_id: UserId,
    pub client_kind: ClientKind,
    pub status: i32,
    pub state: SessionState,
    pub seq: i32,
    pub last_packet_time: Instant,
    pub outbound_rx: mpsc::Receiver<Bytes>,
    outbound_tx: mpsc::Sender<Bytes>,
    valid: Arc<AtomicBool>,
}

impl Session {
    pub fn new(id: u64) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        Self {
            id,
            user_id: 0,
            client_kind: 0,
            status: 0,
            state: SessionState::Unauth,
            seq: 0,
            last_packet_time: Instant::now(),
            outbound_rx,
            outbound_tx,
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            outbound: self.outbound_tx.clone(),
            valid: self.valid.clone(),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == SessionState::Auth
    }

    pub fn touch(&mut self) {
        self.last_packet_time = Instant::now();
    }

    pub fn next_seq(&mut self) -> i32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn complete_login(&mut self, user_id: UserId, client_kind: ClientKind, status: i32) {
        self.user_id = user_id;
        self.client_kind = client_kind;
        self.status = status;
        self.state = SessionState::Auth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_unauth_with_zero_user() {
        let s = Session::new(1);
        assert_eq!(s.state, SessionState::Unauth);
        assert_eq!(s.user_id, 0);
        assert!(!s.is_logged_in());
    }

    #[test]
    fn complete_login_marks_auth_and_stores_identity() {
        let mut s = Session::new(1);
        s.complete_login(42, 1, 3);
        assert!(s.is_logged_in());
        assert_eq!(s.user_id, 42);
        assert_eq!(s.client_kind, 1);
        assert_eq!(s.status, 3);
    }

    #[test]
    fn next_seq_increments_each_call() {
        let mut s = Session::new(1);
        assert_eq!(s.next_seq(), 0);
        assert_eq!(s.next_seq(), 1);
        assert_eq!(s.next_seq(), 2);
    }

    #[tokio::test]
    async fn handle_send_is_observed_by_owning_session() {
        let mut s = Session::new(1);
        let handle = s.handle();
        handle.send(Bytes::from_static(b"hello"));
        let received = s.outbound_rx.recv().await.unwrap();
        assert_eq!(&received[..], b"hello");
    }

    #[test]
    fn mark_invalid_is_observed_through_handle() {
        let s = Session::new(1);
        let handle = s.handle();
        assert!(handle.is_valid());
        s.mark_invalid();
        assert!(!handle.is_valid());
    }
}
