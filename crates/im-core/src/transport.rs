//! Narrow transport contract the connection task uses for the things
//! the core needs to trigger directly: closing an idle or rejected
//! connection, and identifying it in logs. Normal outbound delivery
//! goes through [`crate::session::SessionHandle`], not this trait —
//! this is the collaborator a connection task holds, not something
//! fan-out reaches into.

pub trait Transport: Send + Sync {
    fn peer_address(&self) -> &str;
    fn force_close(&self);
}
