//! Data locality of the current placement
//!
//! Cost is one minus the achieved locality relative to the best locality each
//! region could get anywhere, so a placement that is as local as the data
//! allows scores 0 even when no region is fully local.

use placement_core::{Action, ClusterSnapshot};

/// Granularity at which locality is scored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalityScope {
    Server,
    Rack,
}

#[derive(Debug, Clone)]
pub struct LocalityCost {
    scope: LocalityScope,
    /// Achieved locality summed over the regions on each server
    per_server: Vec<f64>,
    best_total: f64,
}

impl LocalityCost {
    pub fn new(scope: LocalityScope) -> Self {
        Self {
            scope,
            per_server: Vec::new(),
            best_total: 0.0,
        }
    }

    pub fn scope(&self) -> LocalityScope {
        self.scope
    }

    fn fraction(&self, snapshot: &ClusterSnapshot, region: usize, server: usize) -> f64 {
        match self.scope {
            LocalityScope::Server => snapshot.locality(region, server) as f64,
            LocalityScope::Rack => {
                snapshot.rack_locality(region, snapshot.rack_of_server(server)) as f64
            }
        }
    }

    fn best(&self, snapshot: &ClusterSnapshot, region: usize) -> f64 {
        let best = match self.scope {
            LocalityScope::Server => (0..snapshot.num_servers())
                .map(|s| snapshot.locality(region, s))
                .fold(0.0f32, f32::max),
            LocalityScope::Rack => (0..snapshot.num_racks())
                .map(|rack| snapshot.rack_locality(region, rack))
                .fold(0.0f32, f32::max),
        };
        best as f64
    }

    fn server_sum(&self, snapshot: &ClusterSnapshot, server: usize) -> f64 {
        snapshot
            .regions_on(server)
            .iter()
            .map(|&r| self.fraction(snapshot, r, server))
            .sum()
    }

    pub fn init(&mut self, snapshot: &ClusterSnapshot) {
        self.per_server = (0..snapshot.num_servers())
            .map(|s| self.server_sum(snapshot, s))
            .collect();
        self.best_total = snapshot
            .placeable_regions()
            .iter()
            .map(|&r| self.best(snapshot, r))
            .sum();
    }

    pub fn update(&mut self, snapshot: &ClusterSnapshot, action: &Action) {
        if let Some((a, b)) = action.touched_servers() {
            self.per_server[a] = self.server_sum(snapshot, a);
            self.per_server[b] = self.server_sum(snapshot, b);
        }
    }

    pub fn cost(&self) -> f64 {
        if self.best_total <= 0.0 {
            return 0.0;
        }
        let achieved: f64 = self.per_server.iter().sum();
        (1.0 - achieved / self.best_total).clamp(0.0, 1.0)
    }
}
