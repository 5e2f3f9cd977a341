//! Test doubles for the core's own unit and integration tests. Not
//! compiled into `services/server`.

mod in_memory_user_store;

pub use in_memory_user_store::InMemoryUserStore;
