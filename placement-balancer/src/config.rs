//! Balancer configuration
//!
//! Loaded from a TOML file or from environment variables, falling back to
//! defaults for anything not set.

use placement_core::LoadMetric;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Multiplier applied to each cost function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub region_count_skew: f64,
    pub table_skew: f64,
    pub move_cost: f64,
    pub server_locality: f64,
    pub rack_locality: f64,
    pub read_request: f64,
    pub write_request: f64,
    pub coprocessor_request: f64,
    pub store_file_size: f64,
    pub mem_store_size: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            region_count_skew: 500.0,
            table_skew: 35.0,
            move_cost: 7.0,
            server_locality: 25.0,
            rack_locality: 15.0,
            read_request: 5.0,
            write_request: 5.0,
            coprocessor_request: 5.0,
            store_file_size: 5.0,
            mem_store_size: 5.0,
        }
    }
}

impl CostWeights {
    fn entries(&self) -> [(&'static str, f64); 10] {
        [
            ("region_count_skew", self.region_count_skew),
            ("table_skew", self.table_skew),
            ("move_cost", self.move_cost),
            ("server_locality", self.server_locality),
            ("rack_locality", self.rack_locality),
            ("read_request", self.read_request),
            ("write_request", self.write_request),
            ("coprocessor_request", self.coprocessor_request),
            ("store_file_size", self.store_file_size),
            ("mem_store_size", self.mem_store_size),
        ]
    }

    fn entries_mut(&mut self) -> [(&'static str, &mut f64); 10] {
        [
            ("region_count_skew", &mut self.region_count_skew),
            ("table_skew", &mut self.table_skew),
            ("move_cost", &mut self.move_cost),
            ("server_locality", &mut self.server_locality),
            ("rack_locality", &mut self.rack_locality),
            ("read_request", &mut self.read_request),
            ("write_request", &mut self.write_request),
            ("coprocessor_request", &mut self.coprocessor_request),
            ("store_file_size", &mut self.store_file_size),
            ("mem_store_size", &mut self.mem_store_size),
        ]
    }
}

/// How many regions one cycle may displace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveBudget {
    /// Fraction of the cluster's regions allowed to move
    pub max_move_percent: f64,
    /// Budget floor, so small clusters can always make progress
    pub min_max_moves: usize,
    /// Budget ceiling for very large clusters
    pub max_max_moves: usize,
}

impl Default for MoveBudget {
    fn default() -> Self {
        Self {
            max_move_percent: 0.25,
            min_max_moves: 600,
            max_max_moves: 5000,
        }
    }
}

impl MoveBudget {
    /// Maximum regions that may move in a cluster of `num_regions`
    pub fn max_moves(&self, num_regions: usize) -> usize {
        let scaled = (num_regions as f64 * self.max_move_percent) as usize;
        scaled.max(self.min_max_moves).min(self.max_max_moves)
    }
}

/// Balancer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub weights: CostWeights,

    pub move_budget: MoveBudget,

    /// Weighted-average cost below which the cluster counts as balanced
    pub min_cost_need_balance: f64,

    /// Hard cap on search iterations
    pub max_steps: u64,

    /// Iterations allowed per region per server
    pub steps_per_region: u64,

    /// Wall-clock limit for one search in milliseconds
    pub max_running_time_ms: u64,

    /// Metric the load generator ranks servers by; region count when unset
    pub load_generator_metric: Option<LoadMetric>,

    /// Fixed RNG seed for reproducible searches
    pub seed: Option<u64>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            weights: CostWeights::default(),
            move_budget: MoveBudget::default(),
            min_cost_need_balance: 0.05,
            max_steps: 1_000_000,
            steps_per_region: 800,
            max_running_time_ms: 30_000,
            load_generator_metric: None,
            seed: None,
        }
    }
}

impl BalancerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BalancerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `BALANCER_*` variables from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let defaults = config.clone();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<f64>().ok());
        let parsed_u64 = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        config.min_cost_need_balance = parsed("BALANCER_MIN_COST_NEED_BALANCE")
            .unwrap_or(defaults.min_cost_need_balance);

        config.max_steps = parsed_u64("BALANCER_MAX_STEPS").unwrap_or(defaults.max_steps);

        config.steps_per_region =
            parsed_u64("BALANCER_STEPS_PER_REGION").unwrap_or(defaults.steps_per_region);

        config.max_running_time_ms =
            parsed_u64("BALANCER_MAX_RUNNING_TIME_MS").unwrap_or(defaults.max_running_time_ms);

        config.seed = parsed_u64("BALANCER_SEED");

        if let Some(name) = lookup("BALANCER_LOAD_GENERATOR_METRIC") {
            let metric = LoadMetric::from_name(name.trim()).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "BALANCER_LOAD_GENERATOR_METRIC".to_string(),
                    name.clone(),
                )
            })?;
            config.load_generator_metric = Some(metric);
        }

        config.move_budget.max_move_percent = parsed("BALANCER_MAX_MOVE_PERCENT")
            .unwrap_or(defaults.move_budget.max_move_percent);

        config.move_budget.min_max_moves = parsed_u64("BALANCER_MIN_MAX_MOVES")
            .map(|v| v as usize)
            .unwrap_or(defaults.move_budget.min_max_moves);

        config.move_budget.max_max_moves = parsed_u64("BALANCER_MAX_MAX_MOVES")
            .map(|v| v as usize)
            .unwrap_or(defaults.move_budget.max_max_moves);

        for (name, weight) in config.weights.entries_mut() {
            let var = format!("BALANCER_WEIGHT_{}", name.to_uppercase());
            if let Some(value) = parsed(&var) {
                *weight = value;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, weight) in self.weights.entries() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidValue(
                    format!("weights.{}", name),
                    weight.to_string(),
                ));
            }
        }

        if !self.min_cost_need_balance.is_finite() || self.min_cost_need_balance < 0.0 {
            return Err(ConfigError::InvalidValue(
                "min_cost_need_balance".to_string(),
                self.min_cost_need_balance.to_string(),
            ));
        }

        let percent = self.move_budget.max_move_percent;
        if !(percent > 0.0 && percent <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "move_budget.max_move_percent".to_string(),
                percent.to_string(),
            ));
        }

        if self.move_budget.min_max_moves > self.move_budget.max_max_moves {
            return Err(ConfigError::InvalidValue(
                "move_budget.min_max_moves".to_string(),
                format!(
                    "{} exceeds max_max_moves {}",
                    self.move_budget.min_max_moves, self.move_budget.max_max_moves
                ),
            ));
        }

        if self.max_steps == 0 || self.steps_per_region == 0 {
            return Err(ConfigError::InvalidValue(
                "max_steps/steps_per_region".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the search time limit as Duration
    pub fn max_running_time(&self) -> Duration {
        Duration::from_millis(self.max_running_time_ms)
    }
}
