use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::layout::ValidationIssue;

/// Id prefix reserved for synthesized virtual nodes.
pub const VIRTUAL_ID_PREFIX: &str = "__v";

/// A node as supplied by the graph host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputNode {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl InputNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// An edge as supplied by the graph host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
}

impl InputEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            weight: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Semantic role of a caller-supplied node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Ordinary,
    /// Free end of an edge, owned by the preview-line subsystem.
    EndpointMarker,
}

impl NodeRole {
    /// Maps a host `type` string to a role. `virtual` is reserved and
    /// yields `None`.
    pub fn from_type(node_type: Option<&str>) -> Option<Self> {
        match node_type.map(str::trim) {
            Some("virtual") => None,
            Some("endpoint") | Some("endpoint-marker") | Some("endpointMarker") => {
                Some(Self::EndpointMarker)
            }
            _ => Some(Self::Ordinary),
        }
    }
}

/// Complete node/edge payload handed to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphInput {
    #[serde(default)]
    pub nodes: Vec<InputNode>,
    #[serde(default)]
    pub edges: Vec<InputEdge>,
}

impl GraphInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, id: &str) -> Self {
        self.nodes.push(InputNode::new(id));
        self
    }

    pub fn edge(mut self, source: &str, target: &str) -> Self {
        self.edges.push(InputEdge::new(source, target));
        self
    }

    /// Builds a graph from `a->b` pairs, declaring nodes in first-seen order.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut graph = Self::new();
        for (source, target) in pairs {
            for id in [source, target] {
                if !graph.nodes.iter().any(|node| node.id == *id) {
                    graph.nodes.push(InputNode::new(*id));
                }
            }
            graph.edges.push(InputEdge::new(*source, *target));
        }
        graph
    }
}

/// Decodes a host document `{ "nodes": [...], "edges": [...] }` without
/// failing on shape problems. Anything that cannot be used is reported as a
/// [`ValidationIssue`]; recoverable field problems are coerced.
pub fn decode_graph(doc: &Value) -> (GraphInput, Vec<ValidationIssue>) {
    let mut issues = Vec::new();
    let mut graph = GraphInput::new();

    match doc.get("nodes") {
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                if let Some(node) = decode_node(index, item, &mut issues) {
                    graph.nodes.push(node);
                }
            }
        }
        _ => issues.push(ValidationIssue::NodesNotArray),
    }

    match doc.get("edges") {
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                if let Some(edge) = decode_edge(index, item, &mut issues) {
                    graph.edges.push(edge);
                }
            }
        }
        None | Some(Value::Null) => {}
        Some(_) => issues.push(ValidationIssue::EdgesNotArray),
    }

    (graph, issues)
}

/// Parses text as JSON, falling back to JSON5 for hand-written input.
pub fn parse_graph_text(text: &str) -> anyhow::Result<(GraphInput, Vec<ValidationIssue>)> {
    let doc: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(json_err) => json5::from_str::<Value>(text)
            .map_err(|_| anyhow::anyhow!("Invalid graph document: {json_err}"))?,
    };
    Ok(decode_graph(&doc))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32).filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f32>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn decode_node(index: usize, item: &Value, issues: &mut Vec<ValidationIssue>) -> Option<InputNode> {
    let Some(id) = item.get("id").and_then(id_string) else {
        issues.push(ValidationIssue::MissingNodeId { index });
        return None;
    };
    let mut node = InputNode::new(id.clone());
    node.node_type = item
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);
    node.label = item
        .get("label")
        .and_then(Value::as_str)
        .map(str::to_string);
    node.data = item.get("data").cloned().unwrap_or(Value::Null);

    for field in ["width", "height"] {
        let Some(raw) = item.get(field) else {
            continue;
        };
        if raw.is_null() {
            continue;
        }
        match number(raw) {
            Some(value) if field == "width" => node.width = Some(value),
            Some(value) => node.height = Some(value),
            None => issues.push(ValidationIssue::CoercedField {
                id: id.clone(),
                field,
            }),
        }
    }

    for field in ["x", "y"] {
        let Some(raw) = item.get(field) else {
            continue;
        };
        let value = match number(raw) {
            Some(value) => value,
            None => {
                issues.push(ValidationIssue::CoercedField {
                    id: id.clone(),
                    field,
                });
                0.0
            }
        };
        if field == "x" {
            node.x = Some(value);
        } else {
            node.y = Some(value);
        }
    }

    Some(node)
}

fn decode_edge(index: usize, item: &Value, issues: &mut Vec<ValidationIssue>) -> Option<InputEdge> {
    let source = item.get("source").and_then(id_string);
    let target = item.get("target").and_then(id_string);
    let (Some(source), Some(target)) = (source, target) else {
        issues.push(ValidationIssue::MissingEndpoint { index });
        return None;
    };
    let mut edge = InputEdge::new(source, target);
    edge.id = item.get("id").and_then(id_string);
    if let Some(raw) = item.get("weight")
        && !raw.is_null()
    {
        match number(raw) {
            Some(weight) => edge.weight = Some(weight),
            None => issues.push(ValidationIssue::CoercedField {
                id: edge.id.clone().unwrap_or_else(|| format!("e{index}")),
                field: "weight",
            }),
        }
    }
    Some(edge)
}
