//! Placement Core Library
//!
//! Data model shared by the placement balancer:
//! - Server and region identities, region plans
//! - Index-based cluster snapshots with exact apply/undo of actions
//! - Bounded per-region load history
//! - Locality and rack collaborators

pub mod action;
pub mod error;
pub mod load;
pub mod region;
pub mod server;
pub mod snapshot;
pub mod topology;

pub use action::Action;
pub use error::{PlacementError, Result};
pub use load::{LoadHistoryStore, LoadMetric, RegionLoadSample, LOAD_HISTORY_DEPTH};
pub use region::{RegionIdentity, RegionPlan, TableName};
pub use server::{Address, ServerIdentity};
pub use snapshot::{ClusterSnapshot, ClusterState, SnapshotBuilder, UNPLACEABLE};
pub use topology::{LocalityMap, LocalitySource, RackMap, RackResolver, DEFAULT_RACK};
