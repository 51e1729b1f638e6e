//! The five operation kinds a diff batch is made of.

use inventory_graph::graph::EdgeKind;
use serde_json::Value as Json;

/// One mutation against the stored graph.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    InsertNode {
        id: String,
        kind: String,
        reported: Json,
    },
    UpdateNode {
        id: String,
        reported: Json,
    },
    DeleteNode {
        id: String,
    },
    InsertEdge {
        from: String,
        to: String,
        edge_type: EdgeKind,
    },
    DeleteEdge {
        from: String,
        to: String,
        edge_type: EdgeKind,
    },
}

/// An ordered batch of operations, applied to the store within a single
/// transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch(pub Vec<DiffOp>);

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiffOp> {
        self.0.iter()
    }
}

impl IntoIterator for Batch {
    type Item = DiffOp;
    type IntoIter = std::vec::IntoIter<DiffOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
