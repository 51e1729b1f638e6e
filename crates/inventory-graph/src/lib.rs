//! Typed graph model, content hashing, flatten projection, and the
//! subgraph builder.

pub mod builder;
pub mod flatten;
pub mod graph;
pub mod hash;
pub mod model;

pub mod prelude {
    pub use crate::builder::{EdgeRecord, GraphBuilder, GraphRecord, NodeRecord};
    pub use crate::flatten::flatten;
    pub use crate::graph::{EdgeKind, GraphAccess, NodeData, NodeView};
    pub use crate::hash::content_hash;
    pub use crate::model::{ComplexKind, Model, NodeMetadata, Primitive, Property, TypeRef};
}
