//! Graph diff/merge: compares an incoming subgraph against the
//! stored graph for the same root and emits an ordered [`Batch`] of
//! insert/update/delete operations.

use std::collections::{HashMap, HashSet};

use inventory_core::Error;
use inventory_graph::graph::{EdgeKind, GraphAccess};

use crate::ops::{Batch, DiffOp};

/// Diff `incoming` (a freshly built subgraph) against `stored` (the
/// persisted graph), scoped to `incoming`'s root.
///
/// Algorithm:
/// 1. Walk `incoming` from its root; for each node, look it up in
///    `stored` by id. Missing → insert. Present with a different content
///    hash → update. Present and equal → no-op, but still marks the node
///    visited for reachability.
/// 2. Every edge in `incoming` not already present in `stored` with the
///    same edge type → insert.
/// 3. Stored nodes/edges in the same subgraph root that are not visited
///    during the walk → delete.
/// 4. Deletions are emitted leaves-first: a node with no outgoing
///    `default` edge to another to-be-deleted node precedes its
///    predecessors.
pub fn diff(stored: &GraphAccess, incoming: &GraphAccess) -> Result<Batch, Error> {
    let root = incoming.root()?;

    // Each call to `diff` is one independent walk; visited state must not
    // leak in from a prior merge against the same stored graph.
    stored.reset_visited();

    let mut ops = Vec::new();

    // 1. nodes
    for id in incoming.all_node_ids() {
        let new_view = incoming
            .peek(&id)
            .expect("id came from incoming.all_node_ids()");
        match stored.node(&id) {
            None => {
                let kind = incoming
                    .index_of(&id)
                    .and_then(|idx| incoming.raw_node(idx))
                    .map(|n| n.kind.clone())
                    .unwrap_or_default();
                ops.push(DiffOp::InsertNode {
                    id: id.clone(),
                    kind,
                    reported: new_view.reported.clone(),
                });
            }
            Some(stored_view) => {
                if stored_view.content_hash != new_view.content_hash {
                    ops.push(DiffOp::UpdateNode {
                        id: id.clone(),
                        reported: new_view.reported.clone(),
                    });
                }
                // equal content hash: no-op, node already marked visited
                // by `stored.node(&id)` above.
            }
        }
    }

    // 2. edges: insert anything incoming has that stored doesn't.
    for edge_type in GraphAccess::edge_types() {
        for (from, to) in incoming.all_edges(edge_type) {
            if !stored.has_edge(&from, &to, edge_type) {
                ops.push(DiffOp::InsertEdge {
                    from,
                    to,
                    edge_type,
                });
            }
        }
    }

    // 3. deletions, scoped to the subgraph reachable from `root` in the
    // stored graph.
    let scope: HashSet<String> = stored.subgraph_node_ids(&root).into_iter().collect();

    let doomed_nodes: HashSet<String> = stored
        .not_visited_nodes()
        .into_iter()
        .map(|n| n.id)
        .filter(|id| scope.contains(id))
        .collect();

    let mut doomed_edges: Vec<(String, String, EdgeKind)> = Vec::new();
    for edge_type in GraphAccess::edge_types() {
        for (from, to) in stored.not_visited_edges(edge_type) {
            if scope.contains(&from) || scope.contains(&to) {
                doomed_edges.push((from, to, edge_type));
            }
        }
    }

    // Delete edges before the nodes they're incident to, and order node
    // deletions leaves-first via a dependency count over default edges
    // among the doomed set.
    for (from, to, edge_type) in &doomed_edges {
        ops.push(DiffOp::DeleteEdge {
            from: from.clone(),
            to: to.clone(),
            edge_type: *edge_type,
        });
    }

    for id in leaves_first_order(stored, &doomed_nodes) {
        ops.push(DiffOp::DeleteNode { id });
    }

    Ok(Batch(ops))
}

/// Order `doomed` nodes so that a node with no outgoing `default` edge
/// to another doomed node comes before its predecessors — repeatedly
/// peel off "leaf" nodes of the doomed subset.
fn leaves_first_order(stored: &GraphAccess, doomed: &HashSet<String>) -> Vec<String> {
    let mut remaining: HashMap<String, usize> = HashMap::new();
    for id in doomed {
        let outgoing_in_scope = stored
            .default_successors(id)
            .into_iter()
            .filter(|succ| doomed.contains(succ))
            .count();
        remaining.insert(id.clone(), outgoing_in_scope);
    }

    let mut order = Vec::with_capacity(doomed.len());
    let mut frontier: Vec<String> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| id.clone())
        .collect();
    frontier.sort();

    let mut resolved: HashSet<String> = HashSet::new();
    while let Some(id) = frontier.pop() {
        if !resolved.insert(id.clone()) {
            continue;
        }
        order.push(id.clone());
        for other in doomed {
            if resolved.contains(other) {
                continue;
            }
            let succs = stored.default_successors(other);
            if succs.contains(&id) {
                if let Some(count) = remaining.get_mut(other) {
                    *count -= 1;
                    if *count == 0 {
                        frontier.push(other.clone());
                    }
                }
            }
        }
    }

    // Any remainder is part of a cycle among doomed nodes (shouldn't
    // happen for a tree-shaped subgraph, but break ties deterministically
    // rather than panic).
    let mut leftover: Vec<String> = doomed.difference(&resolved).cloned().collect();
    leftover.sort();
    order.extend(leftover);

    order
}

/// Apply a diff batch to `target` in place. Node updates preserve
/// `metadata`/`desired`; node deletes cascade to incident edges via
/// [`GraphAccess::remove_node`].
pub fn apply_batch(target: &mut GraphAccess, batch: &Batch) -> Result<(), Error> {
    use inventory_graph::graph::NodeData;

    for op in batch.iter() {
        match op {
            DiffOp::InsertNode { id, kind, reported } => {
                target.add_node(NodeData::new(id.clone(), kind.clone(), reported.clone()));
            }
            DiffOp::UpdateNode { id, reported } => {
                target.update_node_reported(id, reported.clone())?;
            }
            DiffOp::DeleteNode { id } => {
                target.remove_node(id);
            }
            DiffOp::InsertEdge {
                from,
                to,
                edge_type,
            } => {
                target.add_edge(from, to, *edge_type)?;
            }
            DiffOp::DeleteEdge {
                from,
                to,
                edge_type,
            } => {
                target.remove_edge(from, to, *edge_type);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_graph::graph::NodeData;

    fn node(g: &mut GraphAccess, id: &str, payload: serde_json::Value) {
        g.add_node(NodeData::new(id, "k", payload));
    }

    #[test]
    fn diff_of_graph_against_itself_is_empty() {
        let mut g = GraphAccess::new();
        node(&mut g, "root", serde_json::json!({}));
        node(&mut g, "child", serde_json::json!({"a": 1}));
        g.add_edge("root", "child", EdgeKind::Default).unwrap();

        let mut stored = GraphAccess::new();
        node(&mut stored, "root", serde_json::json!({}));
        node(&mut stored, "child", serde_json::json!({"a": 1}));
        stored.add_edge("root", "child", EdgeKind::Default).unwrap();

        let batch = diff(&stored, &g).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn diff_detects_insert_update_delete() {
        let mut stored = GraphAccess::new();
        node(&mut stored, "root", serde_json::json!({}));
        node(&mut stored, "old", serde_json::json!({"a": 1}));
        node(&mut stored, "changed", serde_json::json!({"a": 1}));
        stored.add_edge("root", "old", EdgeKind::Default).unwrap();
        stored.add_edge("root", "changed", EdgeKind::Default).unwrap();

        let mut incoming = GraphAccess::new();
        node(&mut incoming, "root", serde_json::json!({}));
        node(&mut incoming, "changed", serde_json::json!({"a": 2}));
        node(&mut incoming, "new", serde_json::json!({"a": 3}));
        incoming.add_edge("root", "changed", EdgeKind::Default).unwrap();
        incoming.add_edge("root", "new", EdgeKind::Default).unwrap();

        let batch = diff(&stored, &incoming).unwrap();

        assert!(batch.iter().any(|op| matches!(op, DiffOp::InsertNode { id, .. } if id == "new")));
        assert!(batch.iter().any(|op| matches!(op, DiffOp::UpdateNode { id, .. } if id == "changed")));
        assert!(batch.iter().any(|op| matches!(op, DiffOp::DeleteNode { id } if id == "old")));
        assert!(batch
            .iter()
            .any(|op| matches!(op, DiffOp::InsertEdge { from, to, .. } if from == "root" && to == "new")));
        assert!(batch
            .iter()
            .any(|op| matches!(op, DiffOp::DeleteEdge { from, to, .. } if from == "root" && to == "old")));
    }

    #[test]
    fn deletions_are_ordered_leaves_first() {
        let mut stored = GraphAccess::new();
        node(&mut stored, "root", serde_json::json!({}));
        node(&mut stored, "mid", serde_json::json!({}));
        node(&mut stored, "leaf", serde_json::json!({}));
        stored.add_edge("root", "mid", EdgeKind::Default).unwrap();
        stored.add_edge("mid", "leaf", EdgeKind::Default).unwrap();

        let mut incoming = GraphAccess::new();
        node(&mut incoming, "root", serde_json::json!({}));

        let batch = diff(&stored, &incoming).unwrap();
        let order: Vec<&str> = batch
            .iter()
            .filter_map(|op| match op {
                DiffOp::DeleteNode { id } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        let leaf_pos = order.iter().position(|&id| id == "leaf").unwrap();
        let mid_pos = order.iter().position(|&id| id == "mid").unwrap();
        assert!(leaf_pos < mid_pos, "expected leaf before mid, got {order:?}");
    }

    #[test]
    fn apply_batch_makes_stored_match_incoming() {
        let mut stored = GraphAccess::new();
        node(&mut stored, "root", serde_json::json!({}));
        node(&mut stored, "old", serde_json::json!({}));
        stored.add_edge("root", "old", EdgeKind::Default).unwrap();

        let mut incoming = GraphAccess::new();
        node(&mut incoming, "root", serde_json::json!({}));
        node(&mut incoming, "new", serde_json::json!({"a": 1}));
        incoming.add_edge("root", "new", EdgeKind::Default).unwrap();

        let batch = diff(&stored, &incoming).unwrap();
        apply_batch(&mut stored, &batch).unwrap();

        assert!(stored.node("new").is_some());
        assert!(stored.node("old").is_none());
        assert!(stored.has_edge("root", "new", EdgeKind::Default));

        // idempotence: re-diffing the now-converged stored graph against
        // the same incoming subgraph yields an empty batch.
        let second = diff(&stored, &incoming).unwrap();
        assert!(second.is_empty());
    }
}
