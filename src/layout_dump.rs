use crate::layout::{
    Hierarchy, HierarchyStats, LayoutResult, PhaseTiming, QualityReport, Rect, ValidationIssue,
};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDump {
    pub success: bool,
    pub skipped: bool,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDump>,
    pub score: f32,
    pub crossings: usize,
    pub bounds: Rect,
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
    pub layers: Vec<Vec<String>>,
    pub phases: Vec<PhaseTiming>,
    pub total_duration_ms: f64,
    pub issues: Vec<IssueDump>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<HierarchyStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDump {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDump {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rank: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDump {
    pub id: String,
    pub source: String,
    pub target: String,
    pub reversed: bool,
    /// Source center, bends through virtual nodes, target center.
    pub points: Vec<[f32; 2]>,
}

#[derive(Debug, Serialize)]
pub struct IssueDump {
    pub severity: &'static str,
    pub message: String,
    #[serde(flatten)]
    pub issue: ValidationIssue,
}

impl LayoutDump {
    pub fn from_result(result: &LayoutResult) -> Self {
        let (nodes, edges, layers, stats) = match &result.hierarchy {
            Some(h) => (node_dumps(h), edge_dumps(h, result), h.layer_ids(), Some(h.stats)),
            None => (Vec::new(), Vec::new(), Vec::new(), None),
        };
        LayoutDump {
            success: result.success,
            skipped: result.skipped,
            cached: result.cached,
            error: result.error.as_ref().map(|err| ErrorDump {
                code: err.code(),
                message: err.to_string(),
            }),
            score: result.score,
            crossings: result.crossings,
            bounds: result.bounds,
            nodes,
            edges,
            layers,
            phases: result.phases.clone(),
            total_duration_ms: result.total_duration_ms(),
            issues: result
                .issues
                .iter()
                .map(|issue| IssueDump {
                    severity: if issue.is_error() { "error" } else { "warning" },
                    message: issue.to_string(),
                    issue: issue.clone(),
                })
                .collect(),
            stats,
            quality: result.quality.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn node_dumps(h: &Hierarchy) -> Vec<NodeDump> {
    h.graph
        .nodes()
        .iter()
        .filter(|node| !node.is_virtual())
        .map(|node| NodeDump {
            id: node.id.clone(),
            x: node.position.x,
            y: node.position.y,
            width: node.width,
            height: node.height,
            rank: node.rank.unwrap_or(0),
        })
        .collect()
}

fn edge_dumps(h: &Hierarchy, result: &LayoutResult) -> Vec<EdgeDump> {
    let center = |idx| {
        let p = h.graph.node(idx).position;
        [p.x, p.y]
    };
    let direct = h.graph.edges().iter().filter(|edge| !edge.is_virtual);
    direct
        .chain(&h.replaced_edges)
        .map(|edge| {
            let mut points = vec![center(edge.source)];
            if let Some(bends) = result.waypoints.get(&edge.id) {
                points.extend(bends.iter().map(|p| [p.x, p.y]));
            }
            points.push(center(edge.target));
            EdgeDump {
                id: edge.id.clone(),
                source: h.graph.node(edge.source).id.clone(),
                target: h.graph.node(edge.target).id.clone(),
                reversed: edge.reversed,
                points,
            }
        })
        .collect()
}

pub fn write_layout_dump(path: &Path, result: &LayoutResult) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let dump = LayoutDump::from_result(result);
    serde_json::to_writer_pretty(writer, &dump)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::ir::GraphInput;
    use crate::layout::{LayoutError, execute_layout};

    #[test]
    fn dump_lists_nodes_edges_and_bends() {
        let input = GraphInput::from_pairs(&[("start", "mid"), ("mid", "end"), ("start", "end")]);
        let result = execute_layout(&input, Rect::default(), &LayoutConfig::default());
        let dump = LayoutDump::from_result(&result);
        assert_eq!(dump.nodes.len(), 3);
        assert_eq!(dump.edges.len(), 3);
        let long = dump
            .edges
            .iter()
            .find(|e| e.source == "start" && e.target == "end")
            .expect("long edge");
        assert_eq!(long.points.len(), 3);
        assert_eq!(dump.layers.len(), 3);
        assert!(dump.layers[1].iter().any(|id| id.starts_with("__v")));

        let json: serde_json::Value =
            serde_json::from_str(&dump.to_json().expect("serializes")).expect("valid json");
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
        assert_eq!(json["phases"][0]["phase"], "preprocess");
    }

    #[test]
    fn failures_carry_error_code() {
        let result = LayoutResult::failure(LayoutError::InProgress, Vec::new());
        let dump = LayoutDump::from_result(&result);
        let json = serde_json::to_value(&dump).expect("serializes");
        assert_eq!(json["error"]["code"], "in_progress");
        assert_eq!(json["nodes"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn dump_file_round_trips_through_json() {
        let dir = std::env::temp_dir().join(format!("flowlay-dump-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("layout.json");
        let input = GraphInput::from_pairs(&[("a", "b"), ("b", "c")]);
        let result = execute_layout(&input, Rect::default(), &LayoutConfig::default());
        write_layout_dump(&path, &result).expect("dump writes");

        let text = std::fs::read_to_string(&path).expect("read back");
        let json: serde_json::Value = serde_json::from_str(&text).expect("valid json");
        assert_eq!(json["success"], true);
        assert_eq!(json["nodes"].as_array().map(Vec::len), Some(3));
        assert_eq!(json["layers"].as_array().map(Vec::len), Some(3));
        assert!(write_layout_dump(&dir.join("missing").join("out.json"), &result).is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn issues_flatten_with_severity() {
        let mut input = GraphInput::from_pairs(&[("a", "b")]);
        input.edges.push(crate::ir::InputEdge::new("a", "ghost"));
        let result = execute_layout(&input, Rect::default(), &LayoutConfig::default());
        let json = serde_json::to_value(LayoutDump::from_result(&result)).expect("serializes");
        let issue = &json["issues"][0];
        assert_eq!(issue["severity"], "error");
        assert_eq!(issue["kind"], "danglingTarget");
        assert_eq!(issue["node"], "ghost");
    }
}
