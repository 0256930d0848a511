use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::layout::{LayoutError, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingReductionMethod {
    #[default]
    Barycenter,
    Median,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreprocessConfig {
    pub default_width: f32,
    pub default_height: f32,
    pub min_width: f32,
    pub max_width: f32,
    pub min_height: f32,
    pub max_height: f32,
    pub default_weight: f32,
    pub min_weight: f32,
    pub max_weight: f32,
    pub remove_isolated: bool,
    /// Host `type` strings whose nodes are dropped before layout.
    pub exclude_node_types: Vec<String>,
    /// Regex; matching node ids are dropped before layout.
    pub exclude_id_pattern: Option<String>,
    /// Fail the layout on validation errors instead of continuing with the
    /// usable subset.
    pub abort_on_invalid: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            default_width: 120.0,
            default_height: 40.0,
            min_width: 20.0,
            max_width: 400.0,
            min_height: 16.0,
            max_height: 300.0,
            default_weight: 1.0,
            min_weight: 0.0,
            max_weight: 100.0,
            remove_isolated: false,
            exclude_node_types: Vec::new(),
            exclude_id_pattern: None,
            abort_on_invalid: false,
        }
    }
}

impl PreprocessConfig {
    pub fn id_filter(&self) -> Result<Option<Regex>, regex::Error> {
        self.exclude_id_pattern
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(Regex::new)
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HierarchyConfig {
    /// When false the plain topological Layer Calculator is used instead.
    pub enabled: bool,
    /// Upper bound on layer width for the fallback layering.
    pub max_nodes_per_layer: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_nodes_per_layer: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderingConfig {
    pub enabled: bool,
    pub max_iterations: usize,
    pub max_swap_passes: usize,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 24,
            max_swap_passes: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PositionConfig {
    pub balance_weight: f32,
    pub balance_passes: usize,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            balance_weight: 0.5,
            balance_passes: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalOptimizerConfig {
    pub enabled: bool,
    pub alignment_damping: f32,
    pub balance_damping: f32,
    pub edge_length_damping: f32,
    pub target_edge_length: f32,
    pub min_layer_spacing: f32,
    pub symmetry_weight: f32,
    pub spacing_weight: f32,
    pub crossing_weight: f32,
    pub edge_length_weight: f32,
}

impl Default for GlobalOptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alignment_damping: 0.3,
            balance_damping: 0.25,
            edge_length_damping: 0.2,
            target_edge_length: 120.0,
            min_layer_spacing: 60.0,
            symmetry_weight: 0.3,
            spacing_weight: 0.3,
            crossing_weight: 0.2,
            edge_length_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Border-to-border gap between neighbors in a layer.
    pub node_spacing: f32,
    pub layer_spacing: f32,
    /// Floor on center distance between neighbors in a layer.
    pub min_node_spacing: f32,
    pub max_iterations: usize,
    pub convergence_threshold: f32,
    pub crossing_reduction_method: CrossingReductionMethod,
    pub max_execution_time_ms: u64,
    pub preprocess: PreprocessConfig,
    pub hierarchy: HierarchyConfig,
    pub ordering: OrderingConfig,
    pub position: PositionConfig,
    pub global: GlobalOptimizerConfig,
    pub cache: CacheConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_spacing: 60.0,
            layer_spacing: 100.0,
            min_node_spacing: 40.0,
            max_iterations: 50,
            convergence_threshold: 0.01,
            crossing_reduction_method: CrossingReductionMethod::Barycenter,
            max_execution_time_ms: 5_000,
            preprocess: PreprocessConfig::default(),
            hierarchy: HierarchyConfig::default(),
            ordering: OrderingConfig::default(),
            position: PositionConfig::default(),
            global: GlobalOptimizerConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<(), LayoutError> {
        let spacings = [
            ("nodeSpacing", self.node_spacing),
            ("layerSpacing", self.layer_spacing),
            ("minNodeSpacing", self.min_node_spacing),
            ("convergenceThreshold", self.convergence_threshold),
            ("minLayerSpacing", self.global.min_layer_spacing),
            ("targetEdgeLength", self.global.target_edge_length),
        ];
        for (name, value) in spacings {
            if !value.is_finite() || value < 0.0 {
                return Err(LayoutError::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        if self.min_node_spacing <= 0.0 {
            return Err(LayoutError::InvalidConfig(
                "minNodeSpacing must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.position.balance_weight) {
            return Err(LayoutError::InvalidConfig(format!(
                "balanceWeight must be within [0, 1], got {}",
                self.position.balance_weight
            )));
        }
        if let Err(err) = self.preprocess.id_filter() {
            return Err(LayoutError::InvalidConfig(format!(
                "excludeIdPattern is not a valid regex: {err}"
            )));
        }
        Ok(())
    }

    /// Horizontal center distance required between two neighbors.
    pub fn separation(&self, left_width: f32, right_width: f32) -> f32 {
        ((left_width + right_width) / 2.0 + self.node_spacing).max(self.min_node_spacing)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub bounds: Rect,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundsFile {
    x: Option<f32>,
    y: Option<f32>,
    width: Option<f32>,
    height: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    layout: Option<LayoutConfig>,
    bounds: Option<BoundsFile>,
    log_level: Option<String>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path)?;
    let parsed: ConfigFile = match serde_json::from_str(&contents) {
        Ok(parsed) => parsed,
        Err(_) => json5::from_str(&contents)?,
    };

    if let Some(layout) = parsed.layout {
        config.layout = layout;
    }
    if let Some(bounds) = parsed.bounds {
        if let Some(v) = bounds.x {
            config.bounds.x = v;
        }
        if let Some(v) = bounds.y {
            config.bounds.y = v;
        }
        if let Some(v) = bounds.width {
            config.bounds.width = v;
        }
        if let Some(v) = bounds.height {
            config.bounds.height = v;
        }
    }
    if parsed.log_level.is_some() {
        config.log_level = parsed.log_level;
    }

    config.layout.validate()?;
    Ok(config)
}
