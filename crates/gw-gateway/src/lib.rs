//! Gateway WebSocket endpoint and pool administration surface (C5).
//! Grounded on `portal/backend`'s `main.rs`/`routes` split.

pub mod admin;
pub mod app;
pub mod viewer;
pub mod ws;

pub use app::{build_router, AppState};
