use crate::config::load_config;
use crate::config::CrossingReductionMethod;
use crate::engine::LayoutEngine;
use crate::ir::parse_graph_text;
use crate::layout::{Filters, preprocess};
use crate::layout_dump::{LayoutDump, write_layout_dump};
use crate::logging::init_logging;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "flowlay", version, about = "Layered layout for flow diagrams")]
pub struct Args {
    /// Graph JSON file ({nodes, edges}) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file for the layout JSON. Defaults to stdout.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Config JSON file
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Width of the target area
    #[arg(short = 'w', long = "width")]
    pub width: Option<f32>,

    /// Height of the target area
    #[arg(short = 'H', long = "height")]
    pub height: Option<f32>,

    /// Crossing reduction heuristic
    #[arg(short = 'm', long = "method", value_enum)]
    pub method: Option<Method>,

    /// Log filter, e.g. `debug` or `flowchart_layout=trace`
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Print the input quality report instead of a layout
    #[arg(long = "quality")]
    pub quality: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Method {
    Barycenter,
    Median,
}

impl From<Method> for CrossingReductionMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Barycenter => CrossingReductionMethod::Barycenter,
            Method::Median => CrossingReductionMethod::Median,
        }
    }
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    init_logging(args.log_level.as_deref().or(config.log_level.as_deref()));

    if let Some(width) = args.width {
        config.bounds.width = width;
    }
    if let Some(height) = args.height {
        config.bounds.height = height;
    }
    if let Some(method) = args.method {
        config.layout.crossing_reduction_method = method.into();
    }

    let text = read_input(args.input.as_deref())?;
    let (graph, decode_issues) = parse_graph_text(&text)?;
    for issue in &decode_issues {
        tracing::warn!(%issue, "input problem");
    }

    if args.quality {
        let data = preprocess(&graph, &Filters::new(), &config.layout.preprocess);
        let json = serde_json::to_string_pretty(&data.statistics)?;
        return write_output(&json, args.output.as_deref());
    }

    let engine = LayoutEngine::new(config.layout).with_bounds(config.bounds);
    let result = engine.layout_decoded(&graph, &decode_issues);

    match args.output.as_deref() {
        Some(path) => write_layout_dump(path, &result)?,
        None => write_output(&LayoutDump::from_result(&result).to_json()?, None)?,
    }

    match result.error {
        Some(err) => Err(anyhow::anyhow!("layout failed: {err}")),
        None => Ok(()),
    }
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path
        && path != Path::new("-")
    {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn write_output(json: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
