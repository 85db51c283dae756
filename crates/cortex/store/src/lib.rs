//! Cortex session store.
//!
//! The store is the only component that owns durable state: sessions, the
//! append-only event log used as the witness log, graveyard entries, and the
//! per-stop verification records. Everything else reads through query methods
//! and writes through the append operations defined here.
//!
//! Storage is SQLite in WAL mode. A schema-version marker guards against
//! silently operating on a database written by an incompatible version.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod schema;
mod store;

pub use error::{StoreError, StoreResult};
pub use schema::SCHEMA_VERSION;
pub use store::{CloseRecords, ClosedSession, RetryPolicy, SessionStore};
