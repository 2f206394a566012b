//! Gateway credentials, OAuth state, and issued token lifecycle
//!
//! Three stores own the persistent records and a coordinator drives the
//! authorization-code flow across them. Every store sits on an injected
//! `Store<K, V>` so the backend (memory or JSON file) is swappable.
//!
//! Authorization lifecycle:
//! 1. Admin registers a gateway → `GatewayRegistry::add()`
//! 2. `FlowCoordinator::begin_authorization()` issues a state token and returns the provider URL
//! 3. Provider calls back → `FlowCoordinator::complete_authorization()` consumes the state,
//!    exchanges the code, stores the token
//! 4. `FlowCoordinator::refresh()` replaces the token in place
//! 5. `FlowCoordinator::revoke()` revokes at the provider, then deletes the record

pub mod error;
pub mod file_store;
pub mod flow;
pub mod gateway;
pub mod state;
pub mod store;
pub mod tokens;

pub use error::{Error, FlowError, FlowStep, Result};
pub use file_store::JsonFileStore;
pub use flow::{AttemptState, FlowCoordinator};
pub use gateway::{Gateway, GatewayRegistry, GatewayUpdate};
pub use state::{DEFAULT_STATE_TTL, PendingState, StateStore};
pub use store::{MemoryStore, Store, StoreFuture};
pub use tokens::{IssuedToken, NewToken, TokenStore};

/// Current wall-clock time as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
