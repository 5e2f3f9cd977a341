//! IM server binary crate: TCP accept loop, SQLite-backed user store,
//! and the per-connection task that wires a socket to `im-core`'s
//! dispatcher.

pub mod config;
pub mod connection;
pub mod db;

pub use config::ServerConfig;
pub use db::{Db, SqliteUserStore};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use im_core::CoreShared;
use tokio::net::TcpListener;

/// Accepts connections on `listener` until `shutdown` resolves,
/// spawning one task per connection via [`connection::handle_connection`].
pub async fn run_accept_loop(
    listener: TcpListener,
    shared: CoreShared,
    user_store: SqliteUserStore,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let next_session_id = Arc::new(AtomicU64::new(1));
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => spawn_connection(stream, peer, &shared, &user_store, &next_session_id),
                    Err(err) => tracing::warn!(error = %err, "failed to accept connection"),
                }
            }
        }
    }
}

fn spawn_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    shared: &CoreShared,
    user_store: &SqliteUserStore,
    next_session_id: &Arc<AtomicU64>,
) {
    let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);
    let shared = shared.clone();
    let user_store = user_store.clone();
    tracing::info!(session_id, %peer, "accepted connection");
    tokio::spawn(async move {
        connection::handle_connection(stream, peer, session_id, shared, user_store).await;
        tracing::info!(session_id, "connection task finished");
    });
}
