//! Backend-neutral document storage.
//!
//! One async [`Backend`] trait, evaluated against the shared query dialect,
//! with `memory`, `json` and `sqlite` implementations behind a process-wide
//! [`BackendRegistry`]. Backends that can evaluate the dialect natively
//! declare it and receive queries unchanged; the rest scan and filter
//! through `walkabout-query`, so every backend answers every query the same
//! way.

mod backend;
mod error;
mod json;
mod memory;
mod registry;
mod retry;
mod sqlite;
mod util;

pub use backend::{Backend, Document, FindOptions, UpdateOutcome};
pub use error::StorageError;
pub use json::JsonFileBackend;
pub use memory::MemoryBackend;
pub use registry::{global, BackendFactory, BackendRegistry};
pub use retry::{RetryPolicy, Retrying};
pub use sqlite::SqliteBackend;
