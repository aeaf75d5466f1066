use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("min_routing_layer {min} is above max_routing_layer {max}")]
    InvalidLayerRange { min: u8, max: u8 },
    #[error("routing layer {layer} does not exist (technology has {available} layers)")]
    LayerOutOfRange { layer: u8, available: usize },
    #[error("congestion_threshold must lie in (0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("{name} must lie in [0, 1), got {value}")]
    InvalidFraction { name: &'static str, value: f64 },
    #[error("{0} must be non-zero")]
    ZeroSize(&'static str),
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RipupMode {
    /// Only nets that traverse an overflowed edge.
    Drc,
    /// Every net with a shape in a congested tile.
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RipupGranularity {
    Net,
    Segment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyRoot {
    Driver,
    Centroid,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_min_routing_layer")]
    pub min_routing_layer: u8,
    #[serde(default = "default_max_routing_layer")]
    pub max_routing_layer: u8,
    #[serde(default)]
    pub global_capacity_adjustment: f64,
    #[serde(default = "default_true")]
    pub unidirectional_routing: bool,
    #[serde(default = "default_overflow_iteration_budget")]
    pub overflow_iteration_budget: usize,
    #[serde(default = "default_congestion_threshold")]
    pub congestion_threshold: f64,
    /// Keep overflowing paths when no overflow-free reroute exists,
    /// instead of reporting the net unroutable.
    #[serde(default)]
    pub allow_residual_overflow: bool,
    #[serde(default = "default_ripup_mode")]
    pub ripup_mode: RipupMode,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    #[serde(default = "default_gcell_size")]
    pub gcell_size: i64,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_tile_halo")]
    pub tile_halo: u32,
    #[serde(default = "default_via_cost")]
    pub via_cost: f64,
    #[serde(default = "default_wrong_way_cost")]
    pub wrong_way_cost: f64,
    #[serde(default = "default_history_increment")]
    pub history_increment: f64,
    /// Per-round history multiplier in `drc` rip-up mode.
    #[serde(default = "default_history_decay")]
    pub history_decay: f64,
    #[serde(default = "default_congestion_knee")]
    pub congestion_knee: f64,
    #[serde(default = "default_congestion_cost_height")]
    pub congestion_cost_height: f64,
    #[serde(default = "default_overflow_slope")]
    pub overflow_slope: f64,
    #[serde(default = "default_search_margin")]
    pub search_margin: u32,
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,
    #[serde(default = "default_max_overflow_increases")]
    pub max_overflow_increases: usize,
    #[serde(default)]
    pub time_budget_secs: Option<u64>,
    #[serde(default = "default_topology_root")]
    pub topology_root: TopologyRoot,
    #[serde(default = "default_ripup_granularity")]
    pub ripup_granularity: RipupGranularity,
    #[serde(default)]
    pub threads: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_routing_layer: default_min_routing_layer(),
            max_routing_layer: default_max_routing_layer(),
            global_capacity_adjustment: 0.0,
            unidirectional_routing: true,
            overflow_iteration_budget: default_overflow_iteration_budget(),
            congestion_threshold: default_congestion_threshold(),
            allow_residual_overflow: false,
            ripup_mode: default_ripup_mode(),
            random_seed: default_random_seed(),
            gcell_size: default_gcell_size(),
            tile_size: default_tile_size(),
            tile_halo: default_tile_halo(),
            via_cost: default_via_cost(),
            wrong_way_cost: default_wrong_way_cost(),
            history_increment: default_history_increment(),
            history_decay: default_history_decay(),
            congestion_knee: default_congestion_knee(),
            congestion_cost_height: default_congestion_cost_height(),
            overflow_slope: default_overflow_slope(),
            search_margin: default_search_margin(),
            max_expansions: default_max_expansions(),
            max_overflow_increases: default_max_overflow_increases(),
            time_budget_secs: None,
            topology_root: default_topology_root(),
            ripup_granularity: default_ripup_granularity(),
            threads: 0,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_routing_layer > self.max_routing_layer {
            return Err(ConfigError::InvalidLayerRange {
                min: self.min_routing_layer,
                max: self.max_routing_layer,
            });
        }
        if !(self.congestion_threshold > 0.0 && self.congestion_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.congestion_threshold));
        }
        check_fraction("global_capacity_adjustment", self.global_capacity_adjustment)?;
        check_fraction("congestion_knee", self.congestion_knee)?;
        if !(self.history_decay > 0.0 && self.history_decay <= 1.0) {
            return Err(ConfigError::InvalidFraction {
                name: "history_decay",
                value: self.history_decay,
            });
        }
        if self.gcell_size <= 0 {
            return Err(ConfigError::ZeroSize("gcell_size"));
        }
        if self.tile_size == 0 {
            return Err(ConfigError::ZeroSize("tile_size"));
        }
        if self.max_expansions == 0 {
            return Err(ConfigError::ZeroSize("max_expansions"));
        }
        Ok(())
    }
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidFraction { name, value })
    }
}

#[derive(Debug, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_design_file")]
    pub design_file: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            design_file: default_design_file(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_guide_file")]
    pub guide_file: String,
    #[serde(default = "default_congestion_image")]
    pub congestion_image: String,
    #[serde(default = "default_route_image")]
    pub route_image: String,
    #[serde(default = "default_image_scale")]
    pub image_scale: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            guide_file: default_guide_file(),
            congestion_image: default_congestion_image(),
            route_image: default_route_image(),
            image_scale: default_image_scale(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_routing_layer() -> u8 {
    1
}

fn default_max_routing_layer() -> u8 {
    9
}

fn default_overflow_iteration_budget() -> usize {
    50
}

fn default_congestion_threshold() -> f64 {
    1.0
}

fn default_ripup_mode() -> RipupMode {
    RipupMode::Drc
}

fn default_random_seed() -> u64 {
    42
}

fn default_gcell_size() -> i64 {
    3000
}

fn default_tile_size() -> u32 {
    64
}

fn default_tile_halo() -> u32 {
    8
}

fn default_via_cost() -> f64 {
    4.0
}

fn default_wrong_way_cost() -> f64 {
    3.0
}

fn default_history_increment() -> f64 {
    1.0
}

fn default_history_decay() -> f64 {
    0.8
}

fn default_congestion_knee() -> f64 {
    0.5
}

fn default_congestion_cost_height() -> f64 {
    8.0
}

fn default_overflow_slope() -> f64 {
    16.0
}

fn default_search_margin() -> u32 {
    10
}

fn default_max_expansions() -> usize {
    2_000_000
}

fn default_max_overflow_increases() -> usize {
    25
}

fn default_topology_root() -> TopologyRoot {
    TopologyRoot::Driver
}

fn default_ripup_granularity() -> RipupGranularity {
    RipupGranularity::Net
}

fn default_design_file() -> String {
    "inputs/design.toml".to_string()
}

fn default_guide_file() -> String {
    "output/route.guide".to_string()
}

fn default_congestion_image() -> String {
    "output/congestion.png".to_string()
}

fn default_route_image() -> String {
    "output/routes.png".to_string()
}

fn default_image_scale() -> u32 {
    8
}
