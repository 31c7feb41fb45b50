//! Cost functions
//!
//! Each function scores a snapshot in [0, 1]. The search objective is the
//! weighted sum over a closed set of functions configured once per engine.
//! After an action is applied to the snapshot, `cost_after_action` refreshes
//! only the state touched by that action; the refreshed state is always
//! recomputed from the snapshot (never patched with deltas) so that an undo
//! brings every cost back to exactly its previous value.

pub mod load;
pub mod locality;
pub mod moves;
pub mod skew;

use placement_core::{Action, ClusterSnapshot, LoadMetric};
use tracing::debug;

use crate::config::BalancerConfig;

pub use load::LoadCost;
pub use locality::{LocalityCost, LocalityScope};
pub use moves::MoveCost;
pub use skew::{RegionCountSkewCost, TableSkewCost};

/// Scale `value` into [0, 1] between `min` and `max`
pub fn scale(min: f64, max: f64, value: f64) -> f64 {
    if max <= min || value <= min {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Normalized skew of per-server totals
///
/// 0 when the totals are as even as they can be, 1 when everything sits on
/// a single server.
pub fn cost_from_array(stats: &[f64]) -> f64 {
    if stats.len() < 2 {
        return 0.0;
    }
    let count = stats.len() as f64;
    let total: f64 = stats.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mean = total / count;

    // everything on one server
    let max = (count - 1.0) * mean + (total - mean);

    let min = if count > total {
        (count - total) * mean + (1.0 - mean) * total
    } else {
        let num_high = (total - mean.floor() * count).floor();
        let num_low = count - num_high;
        num_high * (mean.ceil() - mean) + num_low * (mean - mean.floor())
    }
    .max(0.0);

    let deviation: f64 = stats.iter().map(|n| (mean - n).abs()).sum();

    scale(min, max, deviation)
}

/// The closed family of cost functions
#[derive(Debug, Clone)]
pub enum CostFunction {
    RegionCountSkew(RegionCountSkewCost),
    TableSkew(TableSkewCost),
    Move(MoveCost),
    Locality(LocalityCost),
    Load(LoadCost),
}

impl CostFunction {
    pub fn name(&self) -> &'static str {
        match self {
            CostFunction::RegionCountSkew(_) => "region_count_skew",
            CostFunction::TableSkew(_) => "table_skew",
            CostFunction::Move(_) => "move_cost",
            CostFunction::Locality(c) => match c.scope() {
                LocalityScope::Server => "server_locality",
                LocalityScope::Rack => "rack_locality",
            },
            CostFunction::Load(c) => c.metric().name(),
        }
    }

    /// Rebuild all state from the snapshot
    pub fn init(&mut self, snapshot: &ClusterSnapshot) {
        match self {
            CostFunction::RegionCountSkew(c) => c.init(snapshot),
            CostFunction::TableSkew(c) => c.init(snapshot),
            CostFunction::Move(c) => c.init(snapshot),
            CostFunction::Locality(c) => c.init(snapshot),
            CostFunction::Load(c) => c.init(snapshot),
        }
    }

    pub fn cost(&self) -> f64 {
        match self {
            CostFunction::RegionCountSkew(c) => c.cost(),
            CostFunction::TableSkew(c) => c.cost(),
            CostFunction::Move(c) => c.cost(),
            CostFunction::Locality(c) => c.cost(),
            CostFunction::Load(c) => c.cost(),
        }
    }

    /// Refresh after `action` has been applied to `snapshot`
    pub fn cost_after_action(&mut self, snapshot: &ClusterSnapshot, action: &Action) -> f64 {
        match self {
            CostFunction::RegionCountSkew(c) => c.update(snapshot, action),
            CostFunction::TableSkew(c) => c.update(snapshot, action),
            CostFunction::Move(c) => c.update(snapshot, action),
            CostFunction::Locality(c) => c.update(snapshot, action),
            CostFunction::Load(c) => c.update(snapshot, action),
        }
        self.cost()
    }

    /// Whether this function has any signal for the snapshot
    pub fn is_needed(&self, snapshot: &ClusterSnapshot) -> bool {
        match self {
            CostFunction::Locality(_) => snapshot.has_locality(),
            CostFunction::Load(_) => snapshot.has_load_history(),
            _ => true,
        }
    }
}

/// A cost function with its multiplier
#[derive(Debug, Clone)]
pub struct WeightedCost {
    pub function: CostFunction,
    pub weight: f64,
}

/// Weighted sum of cost functions
#[derive(Debug, Clone)]
pub struct CostModel {
    costs: Vec<WeightedCost>,
}

impl CostModel {
    pub fn new(costs: Vec<WeightedCost>) -> Self {
        Self { costs }
    }

    /// The full function set with weights from the configuration
    pub fn from_config(config: &BalancerConfig) -> Self {
        let w = &config.weights;
        let mut costs = vec![
            WeightedCost {
                function: CostFunction::RegionCountSkew(RegionCountSkewCost::new()),
                weight: w.region_count_skew,
            },
            WeightedCost {
                function: CostFunction::TableSkew(TableSkewCost::new()),
                weight: w.table_skew,
            },
            WeightedCost {
                function: CostFunction::Move(MoveCost::new(config.move_budget.clone())),
                weight: w.move_cost,
            },
            WeightedCost {
                function: CostFunction::Locality(LocalityCost::new(LocalityScope::Server)),
                weight: w.server_locality,
            },
            WeightedCost {
                function: CostFunction::Locality(LocalityCost::new(LocalityScope::Rack)),
                weight: w.rack_locality,
            },
        ];
        for (metric, weight) in [
            (LoadMetric::ReadRequests, w.read_request),
            (LoadMetric::WriteRequests, w.write_request),
            (LoadMetric::CoprocessorRequests, w.coprocessor_request),
            (LoadMetric::StoreFileSize, w.store_file_size),
            (LoadMetric::MemStoreSize, w.mem_store_size),
        ] {
            costs.push(WeightedCost {
                function: CostFunction::Load(LoadCost::new(metric)),
                weight,
            });
        }
        Self::new(costs)
    }

    pub fn costs(&self) -> &[WeightedCost] {
        &self.costs
    }

    pub fn init(&mut self, snapshot: &ClusterSnapshot) {
        for c in self.costs.iter_mut().filter(|c| c.weight > 0.0) {
            c.function.init(snapshot);
        }
    }

    /// `Σ weight · cost` over functions with positive weight
    pub fn total_cost(&self) -> f64 {
        self.costs
            .iter()
            .filter(|c| c.weight > 0.0)
            .map(|c| c.weight * c.function.cost())
            .sum()
    }

    /// Refresh every function after `action` and return the new total
    pub fn cost_after_action(&mut self, snapshot: &ClusterSnapshot, action: &Action) -> f64 {
        let mut total = 0.0;
        for c in self.costs.iter_mut().filter(|c| c.weight > 0.0) {
            total += c.weight * c.function.cost_after_action(snapshot, action);
        }
        total
    }

    /// Weighted average over the functions that apply to this snapshot
    pub fn normalized_cost(&self, snapshot: &ClusterSnapshot) -> f64 {
        let mut total = 0.0;
        let mut weight_sum = 0.0;
        for c in &self.costs {
            if c.weight <= 0.0 || !c.function.is_needed(snapshot) {
                continue;
            }
            let cost = c.function.cost();
            debug!(function = c.function.name(), cost, weight = c.weight, "Cost");
            total += c.weight * cost;
            weight_sum += c.weight;
        }
        if total <= 0.0 || weight_sum <= 0.0 {
            return 0.0;
        }
        total / weight_sum
    }

    /// `(name, cost)` for every function, for logging
    pub fn breakdown(&self) -> Vec<(&'static str, f64)> {
        self.costs
            .iter()
            .map(|c| (c.function.name(), c.function.cost()))
            .collect()
    }
}
