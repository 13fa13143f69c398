//! Per-user conversation sessions
//!
//! A session is created on first contact and lives for the life of the
//! process. Nothing is ever evicted.

pub mod manager;
pub mod store;

pub use manager::{InMemorySessionStore, SessionStore};
pub use store::{CloudflareCredentials, Session, Step, WorkerRecord};
