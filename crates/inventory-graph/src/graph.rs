//! `GraphAccess`: a typed read view over an in-memory directed multigraph.
//!
//! Backed by `petgraph::stable_graph::StableDiGraph` so that node/edge
//! removal (used by the diff/merge layer) doesn't invalidate other
//! indices. A side `HashMap<String, NodeIndex>` gives id-keyed lookup,
//! the same shape the original Python implementation's
//! `GraphAccess.nodes` index provides.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use inventory_core::Error;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction as PetDirection;
use serde_json::Value as Json;

use crate::flatten::flatten;
use crate::hash::content_hash;
use crate::model::NodeMetadata;

/// `(from, to, edge_type)`; `default` and `delete` are the only two edge
/// kinds the engine recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Default,
    Delete,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 2] = [EdgeKind::Default, EdgeKind::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Default => "default",
            EdgeKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(EdgeKind::Default),
            "delete" => Some(EdgeKind::Delete),
            _ => None,
        }
    }
}

/// A node's stored data.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub id: String,
    pub kind: String,
    pub reported: Json,
    pub desired: Json,
    pub metadata: NodeMetadata,
    pub content_hash: String,
}

impl NodeData {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, reported: Json) -> Self {
        let reported_clone = reported.clone();
        Self {
            id: id.into(),
            kind: kind.into(),
            reported,
            desired: Json::Null,
            metadata: NodeMetadata::default(),
            content_hash: content_hash(&reported_clone),
        }
    }
}

/// A cloned-out snapshot of a node, returned by [`GraphAccess::node`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub id: String,
    pub reported: Json,
    pub content_hash: String,
    pub flat: String,
    pub kind: String,
}

/// Typed read view over an in-memory directed multigraph.
pub struct GraphAccess {
    graph: StableDiGraph<NodeData, EdgeKind>,
    index: HashMap<String, NodeIndex>,
    visited: RefCell<HashSet<NodeIndex>>,
    visited_edges: RefCell<HashSet<(NodeIndex, EdgeKind, NodeIndex)>>,
}

impl GraphAccess {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            visited: RefCell::new(HashSet::new()),
            visited_edges: RefCell::new(HashSet::new()),
        }
    }

    pub fn add_node(&mut self, node: NodeData) -> NodeIndex {
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    pub fn add_edge(&mut self, from: &str, to: &str, edge_type: EdgeKind) -> Result<(), Error> {
        let from_idx = self
            .index
            .get(from)
            .copied()
            .ok_or_else(|| Error::IncompleteGraph(format!("edge references unknown node '{from}'")))?;
        let to_idx = self
            .index
            .get(to)
            .copied()
            .ok_or_else(|| Error::IncompleteGraph(format!("edge references unknown node '{to}'")))?;
        if !self.graph.edges_connecting(from_idx, to_idx).any(|e| *e.weight() == edge_type) {
            self.graph.add_edge(from_idx, to_idx, edge_type);
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Replace a node's reported payload (and recompute its content
    /// hash), leaving `metadata`/`desired` untouched — the diff layer's
    /// `update_node` operation never overwrites lifecycle flags.
    pub fn update_node_reported(&mut self, id: &str, reported: Json) -> Result<(), Error> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
        let node = self
            .graph
            .node_weight_mut(idx)
            .ok_or_else(|| Error::NotFound(format!("node '{id}'")))?;
        node.content_hash = content_hash(&reported);
        node.reported = reported;
        Ok(())
    }

    /// Remove a node and every edge incident to it (a delete cascades to
    /// incident edges but does not recurse further).
    pub fn remove_node(&mut self, id: &str) {
        if let Some(idx) = self.index.remove(id) {
            self.graph.remove_node(idx);
            self.visited.borrow_mut().remove(&idx);
        }
    }

    pub fn remove_edge(&mut self, from: &str, to: &str, edge_type: EdgeKind) {
        let (Some(&from_idx), Some(&to_idx)) = (self.index.get(from), self.index.get(to)) else {
            return;
        };
        if let Some(e) = self
            .graph
            .edges_connecting(from_idx, to_idx)
            .find(|e| *e.weight() == edge_type)
            .map(|e| e.id())
        {
            self.graph.remove_edge(e);
        }
    }

    /// Every node id reachable from `root_id` by following edges of any
    /// kind in either direction — the scope the diff/merge layer treats
    /// as "the same subgraph root" when deciding what is eligible for
    /// deletion.
    pub fn subgraph_node_ids(&self, root_id: &str) -> Vec<String> {
        let Some(&start) = self.index.get(root_id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        seen.insert(start);
        while let Some(idx) = stack.pop() {
            for neighbor in self.graph.neighbors_undirected(idx) {
                if seen.insert(neighbor) {
                    stack.push(neighbor);
                }
            }
        }
        seen.into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.id.clone()))
            .collect()
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn raw_node(&self, idx: NodeIndex) -> Option<&NodeData> {
        self.graph.node_weight(idx)
    }

    /// Look up a node by id, cloning out a view and marking it visited.
    pub fn node(&self, id: &str) -> Option<NodeView> {
        let idx = *self.index.get(id)?;
        let data = self.graph.node_weight(idx)?;
        self.visited.borrow_mut().insert(idx);
        Some(NodeView {
            id: data.id.clone(),
            reported: data.reported.clone(),
            content_hash: data.content_hash.clone(),
            flat: flatten(&data.reported),
            kind: data.kind.clone(),
        })
    }

    /// Nodes never returned by [`GraphAccess::node`].
    pub fn not_visited_nodes(&self) -> Vec<NodeView> {
        let visited = self.visited.borrow();
        self.graph
            .node_indices()
            .filter(|idx| !visited.contains(idx))
            .filter_map(|idx| {
                let data = self.graph.node_weight(idx)?;
                Some(NodeView {
                    id: data.id.clone(),
                    reported: data.reported.clone(),
                    content_hash: data.content_hash.clone(),
                    flat: flatten(&data.reported),
                    kind: data.kind.clone(),
                })
            })
            .collect()
    }

    /// All edges of the given kind, regardless of visited status.
    pub fn edges_of_kind(&self, edge_type: EdgeKind) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter(|e| self.graph[*e] == edge_type)
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some((
                    self.graph.node_weight(from)?.id.clone(),
                    self.graph.node_weight(to)?.id.clone(),
                ))
            })
            .collect()
    }

    /// Whether `(from, to, edge_type)` exists. Marks the edge visited on a
    /// positive match — this is the operation the diff walk drives to
    /// confirm a known edge is still present, mirroring how [`Self::node`]
    /// marks a node visited on lookup.
    pub fn has_edge(&self, from: &str, to: &str, edge_type: EdgeKind) -> bool {
        let (Some(&from_idx), Some(&to_idx)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        let found = self
            .graph
            .edges_connecting(from_idx, to_idx)
            .any(|e| *e.weight() == edge_type);
        if found {
            self.visited_edges
                .borrow_mut()
                .insert((from_idx, edge_type, to_idx));
        }
        found
    }

    /// Edges of `edge_type` never confirmed present via [`Self::has_edge`].
    pub fn not_visited_edges(&self, edge_type: EdgeKind) -> Vec<(String, String)> {
        let visited = self.visited_edges.borrow();
        self.graph
            .edge_indices()
            .filter(|e| self.graph[*e] == edge_type)
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                if visited.contains(&(from, edge_type, to)) {
                    return None;
                }
                Some((
                    self.graph.node_weight(from)?.id.clone(),
                    self.graph.node_weight(to)?.id.clone(),
                ))
            })
            .collect()
    }

    /// The single node with no incoming `default` edge.
    ///
    /// `GraphBuilder::check_complete` is responsible for rejecting graphs
    /// with zero or multiple roots before a `GraphAccess` is handed to
    /// callers that rely on this; this still surfaces `IncompleteGraph`
    /// defensively rather than panicking.
    pub fn root(&self) -> Result<String, Error> {
        let mut roots = self.graph.node_indices().filter(|&idx| {
            self.graph
                .edges_directed(idx, PetDirection::Incoming)
                .all(|e| *e.weight() != EdgeKind::Default)
        });
        let first = roots
            .next()
            .ok_or_else(|| Error::IncompleteGraph("graph has no root node".into()))?;
        if roots.next().is_some() {
            return Err(Error::IncompleteGraph(
                "graph has more than one root node".into(),
            ));
        }
        Ok(self.graph[first].id.clone())
    }

    pub fn edge_types() -> [EdgeKind; 2] {
        EdgeKind::ALL
    }

    /// Clear visited-node and visited-edge tracking.
    ///
    /// Visited state models reachability *during one diff walk*, not a
    /// lifetime property of the stored graph — the diff layer calls this
    /// before walking the stored graph for a new merge so that reachable
    /// nodes from a prior merge don't leak into this one's
    /// `not_visited_nodes`/`not_visited_edges` results.
    pub fn reset_visited(&self) {
        self.visited.borrow_mut().clear();
        self.visited_edges.borrow_mut().clear();
    }

    /// Every node id currently in the graph, in insertion order.
    pub fn all_node_ids(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Look up a node without marking it visited — used by the diff
    /// layer, which tracks reachability itself via `node`/`has_edge`.
    pub fn peek(&self, id: &str) -> Option<NodeView> {
        let idx = *self.index.get(id)?;
        let data = self.graph.node_weight(idx)?;
        Some(NodeView {
            id: data.id.clone(),
            reported: data.reported.clone(),
            content_hash: data.content_hash.clone(),
            flat: flatten(&data.reported),
            kind: data.kind.clone(),
        })
    }

    /// Every edge of `edge_type` as `(from, to)`, without marking it
    /// visited.
    pub fn all_edges(&self, edge_type: EdgeKind) -> Vec<(String, String)> {
        self.edges_of_kind(edge_type)
    }

    /// Outgoing `default` neighbor ids of `id`, used to order deletions
    /// leaves-first in the diff layer.
    pub fn default_successors(&self, id: &str) -> Vec<String> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, PetDirection::Outgoing)
            .filter(|e| *e.weight() == EdgeKind::Default)
            .filter_map(|e| Some(self.graph.node_weight(e.target())?.id.clone()))
            .collect()
    }

    /// Metadata of a node, if present, without affecting visited state.
    pub fn metadata(&self, id: &str) -> Option<NodeMetadata> {
        let &idx = self.index.get(id)?;
        self.graph.node_weight(idx).map(|n| n.metadata)
    }
}

impl Default for GraphAccess {
    fn default() -> Self {
        Self::new()
    }
}
