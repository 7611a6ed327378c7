//! Session lifecycle manager (C4) and the narrow client surface this
//! workspace needs from the external session store (C3).

pub mod manager;
pub mod store;

pub use manager::{SessionManager, SessionManagerConfig};
pub use store::{InMemorySessionStore, InMemoryTargetStore, SessionStore, TargetStore};
