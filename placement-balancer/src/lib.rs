//! Placement Balancer Library
//!
//! Decides how regions should be spread over servers:
//! - Weighted cost model (count/table skew, moves, locality, load)
//! - Greedy stochastic search with exact undo
//! - Round-robin and retain bulk assignment
//! - Group constraint layer (misplaced detection, per-group balancing)

pub mod assignment;
pub mod config;
pub mod cost;
pub mod engine;
pub mod generator;
pub mod group;

// Re-export main types
pub use assignment::{retain_assignment, round_robin_assignment, Assignment};
pub use config::{BalancerConfig, ConfigError, CostWeights, MoveBudget};
pub use cost::{cost_from_array, CostFunction, CostModel, WeightedCost};
pub use engine::{Balancer, BalancerError, ClusterInputs, Result, SearchPhase, SearchStats};
pub use generator::CandidateGenerator;
pub use group::{GroupBalanceOutcome, GroupBalancer, GroupInfo, GroupMembership, DEFAULT_GROUP};
