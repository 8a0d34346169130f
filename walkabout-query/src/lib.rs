//! The query dialect shared by every storage backend.
//!
//! A query is a JSON object in a MongoDB subset. Backends that evaluate the
//! dialect natively forward it unchanged; everything else filters documents
//! through [`matches`] after a physical scan. Both paths must agree on every
//! document, which is what the parity tests in `walkabout-store` pin down.

mod error;
mod eval;
mod path;
mod sort;
mod update;

pub use error::QueryError;
pub use eval::matches;
pub use path::get_path;
pub use sort::{apply_find, cmp_values, sort_documents, SortOrder};
pub use update::apply_update;
