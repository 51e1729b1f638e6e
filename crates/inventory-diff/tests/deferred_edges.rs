//! End-to-end deferred-edge resolution: a later task's timestamp
//! supersedes an earlier task's unreproduced edge.

use std::sync::Arc;

use chrono::{Duration, Utc};
use inventory_core::MemoryEntityStore;
use inventory_diff::prelude::*;
use inventory_graph::graph::{EdgeKind, GraphAccess, NodeData};

fn graph() -> GraphAccess {
    let mut g = GraphAccess::new();
    g.add_node(NodeData::new("root", "graph_root", serde_json::json!({})));
    g.add_node(NodeData::new("id1", "foo", serde_json::json!({})));
    g.add_node(NodeData::new("id2", "bla", serde_json::json!({})));
    g
}

#[tokio::test]
async fn newer_task_timestamp_wins_over_older_unreproduced_edge() {
    let resolver = DeferredEdgeResolver::new(
        Arc::new(MemoryEntityStore::new()),
        Arc::new(MemoryEntityStore::new()),
    );
    let mut g = graph();

    let t0 = Utc::now();
    resolver
        .record(PendingDeferredEdges {
            task_id: "task123".into(),
            scope: "acct-1".into(),
            timestamp: t0,
            edges: vec![DeferredEdgeSpec {
                from: Selector::ByNodeId("id1".into()),
                to: Selector::BySearchCriteria("is(bla)".into()),
                edge_type: EdgeKind::Default,
            }],
        })
        .await
        .unwrap();
    resolver.merge_outer_edges("task123", &mut g).await.unwrap();
    assert!(g.has_edge("id1", "id2", EdgeKind::Default));

    resolver
        .record(PendingDeferredEdges {
            task_id: "task456".into(),
            scope: "acct-1".into(),
            timestamp: t0 + Duration::minutes(10),
            edges: vec![DeferredEdgeSpec {
                from: Selector::ByNodeId("id2".into()),
                to: Selector::ByNodeId("id1".into()),
                edge_type: EdgeKind::Default,
            }],
        })
        .await
        .unwrap();
    let (updated, deleted) = resolver.merge_outer_edges("task456", &mut g).await.unwrap();

    assert_eq!(updated, 1);
    assert_eq!(deleted, 1);
    assert!(!g.has_edge("id1", "id2", EdgeKind::Default));
    assert!(g.has_edge("id2", "id1", EdgeKind::Default));
}
