//! Graph diff/merge and deferred-edge resolution.

pub mod deferred;
pub mod diff;
pub mod ops;
pub mod store;

pub mod prelude {
    pub use crate::deferred::{
        DeferredEdgeResolver, DeferredEdgeSpec, PendingDeferredEdges, ResolvedEdgeEntry, Selector,
    };
    pub use crate::diff::{apply_batch, diff};
    pub use crate::ops::{Batch, DiffOp};
    pub use crate::store::StoredGraph;
}
