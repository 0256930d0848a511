use flowchart_layout::config::LayoutConfig;
use flowchart_layout::ir::parse_graph_text;
use flowchart_layout::layout::{LayoutExecutor, Rect};
use flowchart_layout::layout_dump::LayoutDump;
use serde::Deserialize;
use wasm_bindgen::prelude::*;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowLayoutOptions {
    x: Option<f32>,
    y: Option<f32>,
    width: Option<f32>,
    height: Option<f32>,
    layout: Option<LayoutConfig>,
}

fn build_bounds(options: &FlowLayoutOptions) -> Rect {
    let mut bounds = Rect::default();
    if let Some(x) = options.x {
        bounds.x = x;
    }
    if let Some(y) = options.y {
        bounds.y = y;
    }
    if let Some(width) = options.width {
        bounds.width = width;
    }
    if let Some(height) = options.height {
        bounds.height = height;
    }
    bounds
}

fn layout_to_json(graph_json: &str, options: FlowLayoutOptions) -> Result<String, String> {
    let (graph, decode_issues) = parse_graph_text(graph_json).map_err(|error| error.to_string())?;
    let bounds = build_bounds(&options);
    let config = options.layout.unwrap_or_default();
    let result = LayoutExecutor::new(&config, bounds)
        .with_issues(decode_issues)
        .run(&graph);
    LayoutDump::from_result(&result)
        .to_json()
        .map_err(|error| error.to_string())
}

/// Lays out a `{nodes, edges}` graph and returns the layout dump as JSON.
/// Layout failures are reported inside the dump, not thrown.
#[wasm_bindgen]
pub fn layout_flow_graph(graph_json: &str, options_json: Option<String>) -> Result<String, JsValue> {
    let options = if let Some(raw_options) = options_json {
        serde_json::from_str::<FlowLayoutOptions>(&raw_options)
            .map_err(|error| JsValue::from_str(&error.to_string()))?
    } else {
        FlowLayoutOptions::default()
    };

    layout_to_json(graph_json, options).map_err(|error| JsValue::from_str(&error))
}

#[cfg(test)]
mod tests {
    use crate::{FlowLayoutOptions, layout_to_json};

    #[test]
    fn lays_out_graph_with_cycle_and_long_edge() {
        let graph = r#"{
            "nodes": [{"id": "start"}, {"id": "check"}, {"id": "work"}, {"id": "end", "width": 80}],
            "edges": [
                {"source": "start", "target": "check"},
                {"source": "check", "target": "work"},
                {"source": "work", "target": "check"},
                {"source": "check", "target": "end"},
                {"id": "skip", "source": "start", "target": "end"}
            ]
        }"#;
        let options: FlowLayoutOptions =
            serde_json::from_str(r#"{"width": 800, "layout": {"crossingReductionMethod": "median"}}"#)
                .expect("options parse");

        let json = layout_to_json(graph, options).expect("graph should lay out");
        let dump: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(dump["success"], true);
        assert_eq!(dump["nodes"].as_array().map(Vec::len), Some(4));
        let skip = dump["edges"]
            .as_array()
            .and_then(|edges| edges.iter().find(|e| e["id"] == "skip"))
            .expect("skip edge");
        assert!(skip["points"].as_array().map_or(0, Vec::len) > 2);
    }

    #[test]
    fn malformed_graph_is_an_error() {
        assert!(layout_to_json("{nodes: [", FlowLayoutOptions::default()).is_err());
    }
}
