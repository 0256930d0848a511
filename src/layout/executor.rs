//! Runs the layout pipeline end to end. Failures of any kind come back as a
//! `LayoutResult` with `success == false`; nothing escapes to the caller.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use web_time::Instant;

use crate::config::LayoutConfig;
use crate::ir::GraphInput;

use super::hierarchy::build_hierarchy;
use super::layering::build_fallback_hierarchy;
use super::optimize::optimize_within;
use super::ordering::optimize_layers_within;
use super::position::{calculate_positions_within, position_map};
use super::score::score_layout;
use super::{
    Filters, Hierarchy, LayoutError, LayoutResult, Phase, PhaseTiming, Point, PositionMap, Rect,
    ValidationIssue, preprocess,
};

/// Wall-clock budget checked cooperatively between and inside phases.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    /// A limit of zero means no limit.
    pub fn new(limit_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            limit: (limit_ms > 0).then(|| Duration::from_millis(limit_ms)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn check(&self, phase: Phase) -> Result<(), LayoutError> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let elapsed = self.start.elapsed();
        if elapsed > limit {
            return Err(LayoutError::Timeout {
                phase,
                limit_ms: limit.as_millis() as u64,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// One configured pipeline run.
pub struct LayoutExecutor<'a> {
    config: &'a LayoutConfig,
    bounds: Rect,
    filters: Filters<'a>,
    prior: Option<&'a PositionMap>,
    issues: Vec<ValidationIssue>,
}

impl<'a> LayoutExecutor<'a> {
    pub fn new(config: &'a LayoutConfig, bounds: Rect) -> Self {
        Self {
            config,
            bounds,
            filters: Filters::new(),
            prior: None,
            issues: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: Filters<'a>) -> Self {
        self.filters = filters;
        self
    }

    /// Seeds layer order from positions of a previous layout.
    pub fn with_prior_positions(mut self, prior: &'a PositionMap) -> Self {
        self.prior = Some(prior);
        self
    }

    /// Issues found before the graph reached the executor, e.g. while
    /// decoding the host document. They are reported ahead of the
    /// preprocessor's own issues and count toward `abort_on_invalid`.
    pub fn with_issues(mut self, issues: Vec<ValidationIssue>) -> Self {
        self.issues = issues;
        self
    }

    pub fn run(&self, input: &GraphInput) -> LayoutResult {
        if let Err(err) = self.config.validate() {
            tracing::warn!(error = %err, "rejecting layout configuration");
            return LayoutResult::failure(err, Vec::new());
        }

        let deadline = Deadline::new(self.config.max_execution_time_ms);
        let current = Cell::new(Phase::Preprocess);
        let mut phases = Vec::new();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.pipeline(input, &deadline, &current, &mut phases)
        }));

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, code = err.code(), "layout failed");
                LayoutResult::failure(err, phases)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let phase = current.get();
                tracing::error!(%phase, %message, "layout phase panicked");
                LayoutResult::failure(LayoutError::Panicked { phase, message }, phases)
            }
        }
    }

    fn pipeline(
        &self,
        input: &GraphInput,
        deadline: &Deadline,
        current: &Cell<Phase>,
        phases: &mut Vec<PhaseTiming>,
    ) -> Result<LayoutResult, LayoutError> {
        let config = self.config;
        let mut data = timed(Phase::Preprocess, current, phases, deadline, || {
            Ok(preprocess(input, &self.filters, &config.preprocess))
        })?;
        let mut issues = self.issues.clone();
        issues.append(&mut data.issues);
        data.issues = issues;

        // An empty node set alone is the degenerate case, not a rejection.
        let blocking: Vec<ValidationIssue> = data
            .errors()
            .into_iter()
            .filter(|issue| *issue != ValidationIssue::EmptyNodeSet)
            .collect();
        if !blocking.is_empty() {
            if config.preprocess.abort_on_invalid {
                return Err(LayoutError::Validation(blocking));
            }
            tracing::warn!(
                errors = blocking.len(),
                "continuing with the valid subset of the input"
            );
        }

        if data.nodes.len() <= 1 {
            tracing::debug!(nodes = data.nodes.len(), "nothing to lay out");
            return Ok(LayoutResult {
                phases: std::mem::take(phases),
                issues: data.issues,
                quality: Some(data.statistics),
                ..LayoutResult::skipped()
            });
        }
        let mut hierarchy = if config.hierarchy.enabled {
            timed(Phase::HierarchyBuild, current, phases, deadline, || {
                Ok(build_hierarchy(&data))
            })?
        } else {
            tracing::info!("hierarchical builder disabled; using fallback layering");
            timed(Phase::FallbackLayering, current, phases, deadline, || {
                Ok(build_fallback_hierarchy(&data, config.hierarchy.max_nodes_per_layer))
            })?
        };

        if config.ordering.enabled {
            timed(Phase::LayerOptimization, current, phases, deadline, || {
                optimize_layers_within(&mut hierarchy, self.prior, config, deadline)
            })?;
        } else {
            tracing::info!("layer optimization disabled; keeping build order");
        }

        let points = timed(Phase::PositionCalculation, current, phases, deadline, || {
            calculate_positions_within(&hierarchy, self.bounds, config, deadline)
        })?;

        let (points, score) = if config.global.enabled {
            let outcome = timed(Phase::GlobalOptimization, current, phases, deadline, || {
                optimize_within(&points, &hierarchy, self.bounds, config, deadline)
            })?;
            (outcome.positions, outcome.score)
        } else {
            tracing::info!("global optimizer disabled");
            let score = score_layout(&hierarchy, &points, self.bounds, config);
            (points, score)
        };
        deadline.check(Phase::GlobalOptimization)?;

        hierarchy.apply_positions(&points);
        let waypoints = edge_waypoints(&hierarchy, &points);
        let bounds = Rect::enclosing(
            hierarchy
                .graph
                .nodes()
                .iter()
                .zip(&points)
                .map(|(node, point)| (*point, node.width, node.height)),
        )
        .unwrap_or_else(Rect::empty);
        tracing::debug!(
            layers = hierarchy.layers.len(),
            crossings = score.crossings,
            score = score.total,
            elapsed_ms = deadline.elapsed_ms(),
            "layout complete"
        );

        Ok(LayoutResult {
            success: true,
            skipped: false,
            cached: false,
            positions: position_map(&hierarchy, &points),
            waypoints,
            score: score.total,
            crossings: score.crossings,
            bounds,
            phases: std::mem::take(phases),
            issues: data.issues,
            quality: Some(data.statistics),
            error: None,
            hierarchy: Some(hierarchy),
        })
    }
}

pub fn execute_layout(input: &GraphInput, bounds: Rect, config: &LayoutConfig) -> LayoutResult {
    LayoutExecutor::new(config, bounds).run(input)
}

fn timed<T>(
    phase: Phase,
    current: &Cell<Phase>,
    phases: &mut Vec<PhaseTiming>,
    deadline: &Deadline,
    run: impl FnOnce() -> Result<T, LayoutError>,
) -> Result<T, LayoutError> {
    deadline.check(phase)?;
    current.set(phase);
    let _span = tracing::debug_span!("layout_phase", %phase).entered();
    let started = Instant::now();
    let value = run();
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    tracing::debug!(duration_ms, "phase finished");
    phases.push(PhaseTiming { phase, duration_ms });
    value
}

/// Virtual node centers per replaced user edge, from source to target.
fn edge_waypoints(h: &Hierarchy, points: &[Point]) -> BTreeMap<String, Vec<Point>> {
    h.replaced_edges
        .iter()
        .map(|edge| {
            let chain = h.chain_for(&edge.id);
            let bends = chain
                .iter()
                .take(chain.len().saturating_sub(1))
                .map(|&segment| points[h.graph.edge(segment).target])
                .collect();
            (edge.id.clone(), bends)
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
