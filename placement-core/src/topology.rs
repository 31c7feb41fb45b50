//! Topology collaborators
//!
//! Locality fractions and rack membership come from outside the balancer.
//! Both are modelled as small traits so hosts can plug in their storage
//! layer; static map implementations cover tests and simple deployments.

use std::collections::HashMap;

use crate::region::RegionIdentity;
use crate::server::{Address, ServerIdentity};

/// Rack assigned to servers the resolver knows nothing about
pub const DEFAULT_RACK: &str = "/default-rack";

/// Source of per-region, per-server data locality
pub trait LocalitySource: Send + Sync {
    /// Fraction (0.0 - 1.0) of the region's data resident on the server
    fn locality(&self, region: &RegionIdentity, server: &ServerIdentity) -> f32;
}

/// Resolves the rack a server lives in
pub trait RackResolver: Send + Sync {
    fn rack_of(&self, server: &ServerIdentity) -> String;
}

/// Locality table keyed by region and server address
#[derive(Debug, Clone, Default)]
pub struct LocalityMap {
    fractions: HashMap<(RegionIdentity, Address), f32>,
}

impl LocalityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the locality of a region on a server, clamped to [0, 1]
    pub fn set(&mut self, region: &RegionIdentity, server: &ServerIdentity, fraction: f32) {
        self.fractions
            .insert((region.clone(), server.address()), fraction.clamp(0.0, 1.0));
    }

    pub fn with(mut self, region: &RegionIdentity, server: &ServerIdentity, fraction: f32) -> Self {
        self.set(region, server, fraction);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fractions.is_empty()
    }
}

impl LocalitySource for LocalityMap {
    fn locality(&self, region: &RegionIdentity, server: &ServerIdentity) -> f32 {
        self.fractions
            .get(&(region.clone(), server.address()))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Rack table keyed by host name
#[derive(Debug, Clone, Default)]
pub struct RackMap {
    racks: HashMap<String, String>,
}

impl RackMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, rack: impl Into<String>) -> Self {
        self.racks.insert(host.into(), rack.into());
        self
    }
}

impl RackResolver for RackMap {
    fn rack_of(&self, server: &ServerIdentity) -> String {
        self.racks
            .get(&server.host)
            .cloned()
            .unwrap_or_else(|| DEFAULT_RACK.to_string())
    }
}
