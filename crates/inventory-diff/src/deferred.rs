//! Deferred-edge resolver: edges whose endpoints are known only by
//! search criteria at collection time, persisted per task and resolved
//! into concrete graph edges once the producing task finishes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use inventory_core::{EntityStore, Error};
use inventory_graph::graph::{EdgeKind, GraphAccess};
use inventory_query::ast::Term;
use inventory_query::eval::{evaluate_term, NodeFields};
use inventory_query::parser::parse_query;
use serde::{Deserialize, Serialize};

/// Either endpoint of a [`DeferredEdgeSpec`]: a direct id, or a query
/// string whose matches all become endpoints (a Cartesian product is
/// formed between the from-side and to-side matches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selector {
    ByNodeId(String),
    BySearchCriteria(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEdgeSpec {
    pub from: Selector,
    pub to: Selector,
    pub edge_type: EdgeKind,
}

/// One task's batch of deferred edges, as persisted by
/// [`DeferredEdgeResolver::record`].
///
/// `scope` groups deferred edges produced by the same collecting
/// subject (an account, typically) — "newer timestamp wins" is resolved
/// within one scope, so two unrelated accounts' collection tasks never
/// race each other's deferred edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDeferredEdges {
    pub task_id: String,
    pub scope: String,
    pub timestamp: DateTime<Utc>,
    pub edges: Vec<DeferredEdgeSpec>,
}

/// A resolved `(from, to, edge_type)` edge's provenance, used to decide
/// whether a later task's merge supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEdgeEntry {
    pub scope: String,
    pub from: String,
    pub to: String,
    pub edge_type: EdgeKind,
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
}

impl EdgeKind {
    fn ledger_key(self, scope: &str, from: &str, to: &str) -> String {
        format!("{scope}\u{0}{from}\u{0}{to}\u{0}{}", self.as_str())
    }
}

/// Resolves deferred edges against a [`GraphAccess`] and maintains the
/// resolved-edge ledger used by "newer timestamp wins" deletion.
pub struct DeferredEdgeResolver {
    pending: Arc<dyn EntityStore<PendingDeferredEdges>>,
    ledger: Arc<dyn EntityStore<ResolvedEdgeEntry>>,
}

impl DeferredEdgeResolver {
    pub fn new(
        pending: Arc<dyn EntityStore<PendingDeferredEdges>>,
        ledger: Arc<dyn EntityStore<ResolvedEdgeEntry>>,
    ) -> Self {
        Self { pending, ledger }
    }

    /// Persist a task's deferred edges, to be resolved later by
    /// [`DeferredEdgeResolver::merge_outer_edges`].
    pub async fn record(&self, entry: PendingDeferredEdges) -> Result<(), Error> {
        self.pending
            .put(&entry.task_id, entry)
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }

    /// Resolve and apply the deferred edges recorded for `task_id`
    /// against `graph`, returning `(updated_count, deleted_count)`.
    pub async fn merge_outer_edges(
        &self,
        task_id: &str,
        graph: &mut GraphAccess,
    ) -> Result<(u64, u64), Error> {
        let Some(pending) = self
            .pending
            .get(task_id)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
        else {
            return Ok((0, 0));
        };

        let mut produced: Vec<(String, String, EdgeKind)> = Vec::new();
        for spec in &pending.edges {
            let from_ids = resolve_selector(&spec.from, graph)?;
            let to_ids = resolve_selector(&spec.to, graph)?;
            for from in &from_ids {
                for to in &to_ids {
                    produced.push((from.clone(), to.clone(), spec.edge_type));
                }
            }
        }

        for (from, to, edge_type) in &produced {
            graph.add_edge(from, to, *edge_type)?;
        }
        let updated_count = produced.len() as u64;

        let produced_keys: std::collections::HashSet<String> = produced
            .iter()
            .map(|(from, to, et)| et.ledger_key(&pending.scope, from, to))
            .collect();

        let mut deleted_count = 0u64;
        let existing = self
            .ledger
            .list()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        for entry in existing {
            if entry.scope != pending.scope {
                continue;
            }
            let key = entry.edge_type.ledger_key(&entry.scope, &entry.from, &entry.to);
            if produced_keys.contains(&key) {
                continue;
            }
            if entry.timestamp < pending.timestamp {
                graph.remove_edge(&entry.from, &entry.to, entry.edge_type);
                self.ledger
                    .delete(&key)
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?;
                deleted_count += 1;
            }
            // ties (entry.timestamp == pending.timestamp) are kept — a
            // tie favors the edge already on record.
        }

        for (from, to, edge_type) in &produced {
            let key = edge_type.ledger_key(&pending.scope, from, to);
            self.ledger
                .put(
                    &key,
                    ResolvedEdgeEntry {
                        scope: pending.scope.clone(),
                        from: from.clone(),
                        to: to.clone(),
                        edge_type: *edge_type,
                        timestamp: pending.timestamp,
                        task_id: pending.task_id.clone(),
                    },
                )
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        Ok((updated_count, deleted_count))
    }
}

fn resolve_selector(selector: &Selector, graph: &GraphAccess) -> Result<Vec<String>, Error> {
    match selector {
        Selector::ByNodeId(id) => Ok(vec![id.clone()]),
        Selector::BySearchCriteria(query) => {
            let parsed = parse_query(query)?;
            let term: Term = parsed
                .first_part()
                .map(|p| p.term.clone())
                .unwrap_or(Term::AllTerm);
            Ok(graph
                .all_node_ids()
                .into_iter()
                .filter(|id| {
                    let Some(view) = graph.peek(id) else {
                        return false;
                    };
                    evaluate_term(
                        &term,
                        &NodeFields {
                            id,
                            kind: &view.kind,
                            reported: &view.reported,
                            flat: &view.flat,
                        },
                    )
                })
                .collect())
        }
    }
}
