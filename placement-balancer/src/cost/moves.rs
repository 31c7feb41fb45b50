use placement_core::{Action, ClusterSnapshot};

use super::scale;
use crate::config::MoveBudget;

/// Penalty for displacing regions from where the cycle found them
#[derive(Debug, Clone)]
pub struct MoveCost {
    budget: MoveBudget,
    num_regions: usize,
    moved: usize,
}

impl MoveCost {
    pub fn new(budget: MoveBudget) -> Self {
        Self {
            budget,
            num_regions: 0,
            moved: 0,
        }
    }

    /// Cost of `moved` displaced regions in a cluster of `num_regions`
    pub fn cost_for(budget: &MoveBudget, num_regions: usize, moved: usize) -> f64 {
        let max_moves = budget.max_moves(num_regions).min(num_regions);
        scale(0.0, max_moves as f64, moved as f64)
    }

    pub fn init(&mut self, snapshot: &ClusterSnapshot) {
        self.num_regions = snapshot.num_regions();
        self.moved = snapshot.num_moved_regions();
    }

    pub fn update(&mut self, snapshot: &ClusterSnapshot, _action: &Action) {
        self.moved = snapshot.num_moved_regions();
    }

    pub fn cost(&self) -> f64 {
        Self::cost_for(&self.budget, self.num_regions, self.moved)
    }
}
