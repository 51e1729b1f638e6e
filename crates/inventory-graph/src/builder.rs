//! `GraphBuilder`: consumes an ordered stream of node/edge records and
//! assembles a [`GraphAccess`], validating payloads against a [`Model`]
//! along the way.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use inventory_core::Error;

use crate::graph::{EdgeKind, GraphAccess, NodeData};
use crate::model::Model;

/// One record of the NDJSON ingestion stream: either a node or an
/// edge. `#[serde(untagged)]` lets both shapes live on the same stream,
/// the edge variant distinguished by carrying `from`/`to` instead of
/// `id`/`data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphRecord {
    Node(NodeRecord),
    Edge(EdgeRecord),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub data: Json,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    #[serde(default = "default_edge_type")]
    pub edge_type: String,
}

fn default_edge_type() -> String {
    "default".to_string()
}

/// Builds a [`GraphAccess`] from an ordered record stream.
///
/// Node records are validated (and, for date/datetime properties,
/// coerced) against `model` as they arrive. Edge records are deferred
/// until [`GraphBuilder::add_edge`] is called, so that an edge referring
/// to a node appearing later in the stream still succeeds — `check_complete`
/// is what ultimately enforces every edge endpoint resolves to a known
/// node.
pub struct GraphBuilder<'m> {
    model: &'m Model,
    graph: GraphAccess,
    pending_edges: Vec<EdgeRecord>,
}

impl<'m> GraphBuilder<'m> {
    pub fn new(model: &'m Model) -> Self {
        Self {
            model,
            graph: GraphAccess::new(),
            pending_edges: Vec::new(),
        }
    }

    /// Feed one record from the ingestion stream.
    pub fn add_record(&mut self, record: GraphRecord) -> Result<(), Error> {
        match record {
            GraphRecord::Node(n) => self.add_node(n),
            GraphRecord::Edge(e) => {
                self.pending_edges.push(e);
                Ok(())
            }
        }
    }

    /// Feed an entire stream of records in order.
    pub fn add_records<I: IntoIterator<Item = GraphRecord>>(&mut self, records: I) -> Result<(), Error> {
        for record in records {
            self.add_record(record)?;
        }
        Ok(())
    }

    fn add_node(&mut self, record: NodeRecord) -> Result<(), Error> {
        let validated = self.model.validate(&record.kind, &record.data)?;
        self.graph
            .add_node(NodeData::new(record.id, record.kind, validated));
        Ok(())
    }

    /// Apply every buffered edge record to the underlying graph, failing
    /// with [`Error::IncompleteGraph`] on the first dangling endpoint.
    fn flush_edges(&mut self) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.pending_edges);
        for edge in pending {
            let edge_type = EdgeKind::parse(&edge.edge_type).ok_or_else(|| {
                Error::IncompleteGraph(format!("unknown edge_type '{}'", edge.edge_type))
            })?;
            self.graph.add_edge(&edge.from, &edge.to, edge_type)?;
        }
        Ok(())
    }

    /// Validate the assembled graph: every edge endpoint resolves to a
    /// known node, and exactly one root exists. Consumes the builder and
    /// returns the finished [`GraphAccess`] on success.
    pub fn check_complete(mut self) -> Result<GraphAccess, Error> {
        self.flush_edges()?;
        self.graph.root()?;
        Ok(self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComplexKind, Property, TypeRef, Primitive};

    fn model() -> Model {
        Model::new().with_kind(ComplexKind {
            fqn: "account".to_string(),
            properties: vec![],
        }).with_kind(ComplexKind {
            fqn: "instance".to_string(),
            properties: vec![Property {
                name: "name".to_string(),
                kind: TypeRef::Primitive(Primitive::String),
                required: true,
            }],
        })
    }

    #[test]
    fn builds_valid_graph() {
        let model = model();
        let mut builder = GraphBuilder::new(&model);
        builder
            .add_records(vec![
                GraphRecord::Node(NodeRecord {
                    id: "root".into(),
                    data: serde_json::json!({}),
                    kind: "account".into(),
                }),
                GraphRecord::Node(NodeRecord {
                    id: "i1".into(),
                    data: serde_json::json!({"name": "web"}),
                    kind: "instance".into(),
                }),
                GraphRecord::Edge(EdgeRecord {
                    from: "root".into(),
                    to: "i1".into(),
                    edge_type: "default".into(),
                }),
            ])
            .unwrap();
        let graph = builder.check_complete().unwrap();
        assert_eq!(graph.root().unwrap(), "root");
    }

    #[test]
    fn rejects_dangling_edge_endpoint() {
        let model = model();
        let mut builder = GraphBuilder::new(&model);
        builder
            .add_records(vec![
                GraphRecord::Node(NodeRecord {
                    id: "root".into(),
                    data: serde_json::json!({}),
                    kind: "account".into(),
                }),
                GraphRecord::Edge(EdgeRecord {
                    from: "root".into(),
                    to: "ghost".into(),
                    edge_type: "default".into(),
                }),
            ])
            .unwrap();
        let err = builder.check_complete().unwrap_err();
        assert!(matches!(err, Error::IncompleteGraph(_)));
    }

    #[test]
    fn rejects_zero_roots() {
        let model = model();
        let mut builder = GraphBuilder::new(&model);
        builder
            .add_records(vec![
                GraphRecord::Node(NodeRecord {
                    id: "a".into(),
                    data: serde_json::json!({}),
                    kind: "account".into(),
                }),
                GraphRecord::Node(NodeRecord {
                    id: "b".into(),
                    data: serde_json::json!({}),
                    kind: "account".into(),
                }),
                GraphRecord::Edge(EdgeRecord {
                    from: "a".into(),
                    to: "b".into(),
                    edge_type: "default".into(),
                }),
                GraphRecord::Edge(EdgeRecord {
                    from: "b".into(),
                    to: "a".into(),
                    edge_type: "default".into(),
                }),
            ])
            .unwrap();
        let err = builder.check_complete().unwrap_err();
        assert!(matches!(err, Error::IncompleteGraph(_)));
    }

    #[test]
    fn rejects_model_violation() {
        let model = model();
        let mut builder = GraphBuilder::new(&model);
        let err = builder
            .add_record(GraphRecord::Node(NodeRecord {
                id: "i1".into(),
                data: serde_json::json!({}),
                kind: "instance".into(),
            }))
            .unwrap_err();
        assert!(matches!(err, Error::ModelViolation(_)));
    }
}
