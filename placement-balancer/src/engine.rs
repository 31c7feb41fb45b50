//! Balancer engine
//!
//! Greedy stochastic search over a [`ClusterSnapshot`]: each step asks a
//! candidate generator for an action, applies it, and keeps it only when the
//! weighted cost strictly drops. Rejected actions are undone in place.

use placement_core::{
    Action, ClusterSnapshot, ClusterState, LoadHistoryStore, LocalitySource, PlacementError,
    RackResolver, RegionIdentity, RegionPlan,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{BalancerConfig, ConfigError};
use crate::cost::CostModel;
use crate::generator::CandidateGenerator;

/// Balancer errors
#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, BalancerError>;

/// Where the engine is in a balancing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Evaluating,
    Searching,
    Done,
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchPhase::Idle => "idle",
            SearchPhase::Evaluating => "evaluating",
            SearchPhase::Searching => "searching",
            SearchPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Summary of the last search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchStats {
    pub steps: u64,
    pub accepted: u64,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub elapsed: Duration,
    /// Search stopped on the wall-clock limit rather than the step budget
    pub timed_out: bool,
}

/// Optional collaborators consulted when building a snapshot
#[derive(Clone, Copy, Default)]
pub struct ClusterInputs<'a> {
    pub locality: Option<&'a dyn LocalitySource>,
    pub racks: Option<&'a dyn RackResolver>,
    pub loads: Option<&'a LoadHistoryStore>,
}

impl<'a> ClusterInputs<'a> {
    pub fn snapshot(&self, state: &ClusterState) -> placement_core::Result<ClusterSnapshot> {
        let mut builder = ClusterSnapshot::builder(state);
        if let Some(locality) = self.locality {
            builder = builder.with_locality(locality);
        }
        if let Some(racks) = self.racks {
            builder = builder.with_racks(racks);
        }
        if let Some(loads) = self.loads {
            builder = builder.with_loads(loads);
        }
        builder.build()
    }
}

/// The search engine
///
/// Holds no state across cycles apart from its RNG; callers serialize cycles
/// against the same cluster.
pub struct Balancer {
    config: BalancerConfig,
    model: CostModel,
    rng: StdRng,
    phase: SearchPhase,
    last_stats: Option<SearchStats>,
    unplaceable: Vec<RegionIdentity>,
}

impl Balancer {
    /// Create a balancer from a validated configuration
    pub fn new(config: BalancerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: BalancerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            model: CostModel::from_config(&config),
            config,
            rng,
            phase: SearchPhase::Idle,
            last_stats: None,
            unplaceable: Vec::new(),
        }
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    /// Stats of the most recent search, if one ran
    pub fn last_stats(&self) -> Option<&SearchStats> {
        self.last_stats.as_ref()
    }

    /// Regions of the last cycle that had no legal server and were left in
    /// place; these need an operator
    pub fn unplaceable_regions(&self) -> &[RegionIdentity] {
        &self.unplaceable
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.model
    }

    fn transition(&mut self, phase: SearchPhase) {
        debug!(from = %self.phase, to = %phase, "Balancer phase");
        self.phase = phase;
    }

    /// Weighted total cost of the snapshot as it stands
    pub fn compute_cost(&mut self, snapshot: &ClusterSnapshot) -> f64 {
        self.model.init(snapshot);
        self.model.total_cost()
    }

    /// Whether the normalized cost reaches the balance threshold
    pub fn needs_balance(&mut self, snapshot: &ClusterSnapshot) -> bool {
        if snapshot.num_servers() < 2 {
            return false;
        }
        self.model.init(snapshot);
        let normalized = self.model.normalized_cost(snapshot);
        let needed = normalized >= self.config.min_cost_need_balance;
        if !needed {
            debug!(
                normalized,
                threshold = self.config.min_cost_need_balance,
                "Cluster already balanced"
            );
        }
        needed
    }

    /// One proposal from a uniformly chosen generator
    pub fn next_action(&mut self, snapshot: &ClusterSnapshot) -> Action {
        let generators =
            CandidateGenerator::for_snapshot(snapshot, self.config.load_generator_metric);
        let generator = generators[self.rng.gen_range(0..generators.len())];
        generator.generate(snapshot, &mut self.rng)
    }

    /// Iteration budget for a snapshot
    pub fn step_budget(&self, snapshot: &ClusterSnapshot) -> u64 {
        let scaled = self
            .config
            .steps_per_region
            .saturating_mul(snapshot.num_regions() as u64)
            .saturating_mul(snapshot.num_servers() as u64);
        scaled.min(self.config.max_steps)
    }

    /// Balance a plain `{server → regions}` map
    pub fn balance_cluster(&mut self, state: &ClusterState) -> Result<Option<Vec<RegionPlan>>> {
        self.balance_cluster_with(state, ClusterInputs::default())
    }

    /// Balance with locality, rack and load collaborators
    pub fn balance_cluster_with(
        &mut self,
        state: &ClusterState,
        inputs: ClusterInputs<'_>,
    ) -> Result<Option<Vec<RegionPlan>>> {
        let mut snapshot = inputs.snapshot(state)?;
        self.balance_snapshot(&mut snapshot)
    }

    /// Search for a better placement, leaving the best one in `snapshot`
    ///
    /// Returns `None` when the cluster is already balanced, has fewer than two
    /// servers, or no improving move was found.
    #[instrument(
        skip(self, snapshot),
        fields(servers = snapshot.num_servers(), regions = snapshot.num_regions())
    )]
    pub fn balance_snapshot(
        &mut self,
        snapshot: &mut ClusterSnapshot,
    ) -> Result<Option<Vec<RegionPlan>>> {
        self.last_stats = None;
        self.transition(SearchPhase::Evaluating);

        self.unplaceable = snapshot
            .unplaceable_regions()
            .into_iter()
            .cloned()
            .collect();
        if !self.unplaceable.is_empty() {
            warn!(
                count = self.unplaceable.len(),
                "Regions without a legal server left in place"
            );
        }

        if snapshot.num_servers() < 2 {
            debug!("Fewer than two servers, nothing to balance");
            self.transition(SearchPhase::Done);
            return Ok(None);
        }
        if !self.needs_balance(snapshot) {
            self.transition(SearchPhase::Done);
            return Ok(None);
        }

        self.transition(SearchPhase::Searching);
        let stats = self.search(snapshot)?;

        self.transition(SearchPhase::Evaluating);
        snapshot.verify()?;
        let plans = snapshot.region_plans();

        info!(
            initial_cost = stats.initial_cost,
            final_cost = stats.final_cost,
            steps = stats.steps,
            accepted = stats.accepted,
            timed_out = stats.timed_out,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            plans = plans.len(),
            "Balancing search finished"
        );
        self.last_stats = Some(stats);
        self.transition(SearchPhase::Done);

        if plans.is_empty() {
            Ok(None)
        } else {
            Ok(Some(plans))
        }
    }

    fn search(&mut self, snapshot: &mut ClusterSnapshot) -> Result<SearchStats> {
        let generators =
            CandidateGenerator::for_snapshot(snapshot, self.config.load_generator_metric);
        let max_steps = self.step_budget(snapshot);
        let max_moves = self.config.move_budget.max_moves(snapshot.num_regions());
        let time_limit = self.config.max_running_time();
        let start = Instant::now();

        let initial_cost = self.model.total_cost();
        let mut current = initial_cost;
        let mut stats = SearchStats {
            initial_cost,
            ..Default::default()
        };

        while stats.steps < max_steps {
            if start.elapsed() >= time_limit {
                stats.timed_out = true;
                warn!(steps = stats.steps, "Search stopped on time limit");
                break;
            }
            stats.steps += 1;

            let generator = generators[self.rng.gen_range(0..generators.len())];
            let action = generator.generate(snapshot, &mut self.rng);
            if action.is_null() {
                continue;
            }

            snapshot.apply(&action)?;
            if snapshot.num_moved_regions() > max_moves {
                // over budget: costs were never refreshed, only the snapshot
                snapshot.apply(&action.undo())?;
                continue;
            }

            let cost = self.model.cost_after_action(snapshot, &action);
            if cost < current {
                current = cost;
                stats.accepted += 1;
            } else {
                let undo = action.undo();
                snapshot.apply(&undo)?;
                let restored = self.model.cost_after_action(snapshot, &undo);
                if restored != current {
                    return Err(BalancerError::InvariantViolation(format!(
                        "undo restored cost {} instead of {}",
                        restored, current
                    )));
                }
            }
        }

        stats.final_cost = current;
        stats.elapsed = start.elapsed();
        Ok(stats)
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::from_valid(BalancerConfig::default())
    }
}
