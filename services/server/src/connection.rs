//! Per-connection task: owns one `TcpStream` framed with
//! [`FrameCodec`], reads packets off it, hands them to a
//! [`Dispatcher`], and writes back both dispatch replies and whatever
//! arrives on the session's own outbound queue (fan-out, a
//! duplicate-login kick). A `tokio::select! { biased; ... }` over the
//! socket, the session's mailbox, and a heartbeat tick.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use im_core::{CoreShared, Session, Transport, UserStore};
use im_protocol::{FrameCodec, Packet};
use tokio::net::TcpStream;
use tokio::time::interval;
use tokio_util::codec::Framed;

/// Narrow [`Transport`] for a raw TCP peer. `force_close` only flips a
/// flag the connection task itself polls on its next heartbeat tick or
/// outbound write — there is no separate owner of the socket to signal.
pub struct TcpTransport {
    peer: String,
    closed: Arc<AtomicBool>,
}

impl TcpTransport {
    fn new(peer: String) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (Self { peer, closed: closed.clone() }, closed)
    }
}

impl Transport for TcpTransport {
    fn peer_address(&self) -> &str {
        &self.peer
    }

    fn force_close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Drives one connection to completion. Returns once the peer
/// disconnects, a framing error occurs, the heartbeat watchdog trips,
/// or the session is kicked by a later login from the same user.
pub async fn handle_connection<S: UserStore>(
    stream: TcpStream,
    peer: SocketAddr,
    session_id: u64,
    shared: CoreShared,
    user_store: S,
) {
    let framed = Framed::new(stream, FrameCodec::with_compress_threshold(shared.config.compress_threshold));
    let (mut sink, mut stream) = framed.split();

    let mut session = Session::new(session_id);
    let (transport, closed) = TcpTransport::new(peer.to_string());
    let dispatcher = shared.dispatcher(user_store);
    let mut heartbeat_tick = interval(shared.config.heartbeat.check_interval);
    heartbeat_tick.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            biased;

            _ = heartbeat_tick.tick() => {
                if closed.load(Ordering::Acquire) {
                    tracing::info!(session_id, peer = transport.peer_address(), "connection closed by kick");
                    break;
                }
                if shared.config.heartbeat.is_expired(session.last_packet_time, Instant::now()) {
                    tracing::info!(session_id, peer = transport.peer_address(), "heartbeat timeout, closing connection");
                    break;
                }
            }

            outbound = session.outbound_rx.recv() => {
                match outbound {
                    None => break,
                    Some(frame) => {
                        if let Err(err) = sink.send(frame).await {
                            tracing::warn!(session_id, error = %err, "failed to write outbound frame");
                            break;
                        }
                        if !session.is_valid() {
                            tracing::info!(session_id, "session invalidated, closing after final write");
                            break;
                        }
                    }
                }
            }

            inbound = stream.next() => {
                match inbound {
                    None => break,
                    Some(Err(err)) => {
                        tracing::error!(session_id, error = %err, "framing error, closing connection");
                        break;
                    }
                    Some(Ok(raw)) => {
                        session.touch();
                        match Packet::decode(&raw) {
                            Err(err) => {
                                tracing::warn!(session_id, error = %err, "malformed packet, dropping");
                            }
                            Ok(packet) => match dispatcher.dispatch(&mut session, packet).await {
                                Err(err) => {
                                    tracing::warn!(session_id, error = %err, "dispatch error, dropping packet");
                                }
                                Ok(replies) => {
                                    for reply in replies {
                                        if let Err(err) = sink.send(reply).await {
                                            tracing::warn!(session_id, error = %err, "failed to write reply frame");
                                            break;
                                        }
                                    }
                                }
                            },
                        }
                    }
                }
            }
        }
    }

    if session.is_logged_in() {
        dispatcher.registry().remove(session.user_id, session.client_kind, session.id).await;
    }
    session.mark_invalid();
}
