//! Session state machine, registry, offline buffer, and fan-out
//! engine for an instant-messaging server core. No networking and no
//! persistence of its own: `Transport` and `UserStore` are the seams
//! a concrete service wires in.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod heartbeat;
pub mod model;
pub mod offline;
pub mod registry;
pub mod session;
pub mod transport;
pub mod user_store;

#[cfg(any(test, feature = "test-support"))]
pub mod fakes;

pub use config::CoreConfig;
pub use dispatch::Dispatcher;
pub use error::{CoreError, CoreResult};
pub use fanout::FanoutEngine;
pub use offline::OfflineBuffer;
pub use registry::SessionRegistry;
pub use session::{Session, SessionHandle, SessionState};
pub use transport::Transport;
pub use user_store::UserStore;

/// The collaborators every connection task shares: the session
/// index, the offline buffer, and the fan-out engine built from both.
/// Analogous to a single `AppState` bundle cloned into each task.
#[derive(Clone)]
pub struct CoreShared {
    pub registry: SessionRegistry,
    pub offline: OfflineBuffer,
    pub fanout: FanoutEngine,
    pub config: CoreConfig,
}

impl CoreShared {
    pub fn new(config: CoreConfig) -> Self {
        let registry = SessionRegistry::new();
        let offline = OfflineBuffer::new(config.offline_buffer_depth);
        let fanout = FanoutEngine::new(registry.clone(), offline.clone(), config.group_id_boundary);
        Self { registry, offline, fanout, config }
    }

    pub fn dispatcher<S: UserStore>(&self, user_store: S) -> Dispatcher<S> {
        Dispatcher::new(self.registry.clone(), self.offline.clone(), self.fanout.clone(), user_store)
    }
}
