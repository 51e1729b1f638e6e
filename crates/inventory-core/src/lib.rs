//! Shared primitives for the graph inventory engine.
//!
//! This crate carries the pieces every other crate in the workspace needs:
//! the [`Error`] taxonomy, small time helpers, and the [`EntityStore`]
//! abstraction that the query, graph, diff and workflow layers persist
//! through instead of talking to a database directly.

mod error;
mod store;
pub mod sync;
pub mod time;

pub use error::Error;
pub use store::{EntityStore, MemoryEntityStore, StoreError};
pub use sync::WriterPriorityLock;

/// A JSON value, used throughout the engine for reported/desired payloads.
pub type Json = serde_json::Value;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{EntityStore, Error, Json, MemoryEntityStore, StoreError, WriterPriorityLock};
}
