//! The stored graph as a shared resource: arbitrarily many concurrent
//! readers (queries) versus one exclusive writer (a merge batch, which
//! includes deferred-edge resolution run in the same critical section).

use std::sync::Arc;

use inventory_core::{Error, WriterPriorityLock};
use inventory_graph::graph::GraphAccess;
use tokio::sync::RwLockReadGuard;

use crate::deferred::DeferredEdgeResolver;
use crate::diff::{apply_batch, diff};
use crate::ops::Batch;

/// Owns the persisted graph behind a [`WriterPriorityLock`], so a long
/// stream of queries can't starve an ingestion merge waiting to write.
pub struct StoredGraph {
    graph: WriterPriorityLock<GraphAccess>,
}

impl StoredGraph {
    pub fn new(graph: GraphAccess) -> Self {
        Self {
            graph: WriterPriorityLock::new(graph),
        }
    }

    /// Acquire a shared read guard, e.g. to run a query against the
    /// current graph state.
    pub async fn read(&self) -> RwLockReadGuard<'_, GraphAccess> {
        self.graph.read().await
    }

    /// Diff `incoming` against the stored graph and apply the resulting
    /// batch, all under one writer acquisition so readers never observe
    /// a partially-applied merge.
    pub async fn merge(&self, incoming: &GraphAccess) -> Result<Batch, Error> {
        let mut guard = self.graph.write().await;
        let batch = diff(&guard, incoming)?;
        apply_batch(&mut guard, &batch)?;
        Ok(batch)
    }

    /// Resolve a task's deferred edges against the stored graph. Takes
    /// the same writer lock `merge` does, per spec: "deferred-edge
    /// resolution takes the writer".
    pub async fn merge_outer_edges(
        &self,
        task_id: &str,
        resolver: &DeferredEdgeResolver,
    ) -> Result<(u64, u64), Error> {
        let mut guard = self.graph.write().await;
        resolver.merge_outer_edges(task_id, &mut guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_core::MemoryEntityStore;
    use inventory_graph::graph::{EdgeKind, NodeData};
    use std::time::Duration;

    fn node(g: &mut GraphAccess, id: &str, payload: serde_json::Value) {
        g.add_node(NodeData::new(id, "k", payload));
    }

    #[tokio::test]
    async fn merge_applies_diff_and_is_idempotent() {
        let mut stored = GraphAccess::new();
        node(&mut stored, "root", serde_json::json!({}));
        let store = StoredGraph::new(stored);

        let mut incoming = GraphAccess::new();
        node(&mut incoming, "root", serde_json::json!({}));
        node(&mut incoming, "child", serde_json::json!({"a": 1}));
        incoming.add_edge("root", "child", EdgeKind::Default).unwrap();

        let batch = store.merge(&incoming).await.unwrap();
        assert!(!batch.is_empty());
        assert!(store.read().await.has_edge("root", "child", EdgeKind::Default));

        let second = store.merge(&incoming).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn a_pending_merge_blocks_new_reads_behind_it() {
        let mut stored = GraphAccess::new();
        node(&mut stored, "root", serde_json::json!({}));
        let store = Arc::new(StoredGraph::new(stored));

        let first_read = store.read().await;

        let incoming = {
            let mut g = GraphAccess::new();
            node(&mut g, "root", serde_json::json!({}));
            node(&mut g, "child", serde_json::json!({"a": 1}));
            g.add_edge("root", "child", EdgeKind::Default).unwrap();
            g
        };

        let writer_store = Arc::clone(&store);
        let writer = tokio::spawn(async move { writer_store.merge(&incoming).await.unwrap() });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reader_store = Arc::clone(&store);
        let reader = tokio::spawn(async move { reader_store.read().await.node_count() });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(first_read);
        writer.await.unwrap();
        let count = reader.await.unwrap();
        assert_eq!(count, 2, "reader observed the merge's effect, so it queued behind the writer");
    }

    #[tokio::test]
    async fn merge_outer_edges_runs_under_the_writer_lock() {
        let mut stored = GraphAccess::new();
        node(&mut stored, "root", serde_json::json!({}));
        node(&mut stored, "id1", serde_json::json!({}));
        node(&mut stored, "id2", serde_json::json!({}));
        let store = StoredGraph::new(stored);

        let resolver = DeferredEdgeResolver::new(
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryEntityStore::new()),
        );
        resolver
            .record(crate::deferred::PendingDeferredEdges {
                task_id: "t1".into(),
                scope: "acct".into(),
                timestamp: chrono::Utc::now(),
                edges: vec![crate::deferred::DeferredEdgeSpec {
                    from: crate::deferred::Selector::ByNodeId("id1".into()),
                    to: crate::deferred::Selector::ByNodeId("id2".into()),
                    edge_type: EdgeKind::Default,
                }],
            })
            .await
            .unwrap();

        let (updated, deleted) = store.merge_outer_edges("t1", &resolver).await.unwrap();
        assert_eq!((updated, deleted), (1, 0));
        assert!(store.read().await.has_edge("id1", "id2", EdgeKind::Default));
    }
}
