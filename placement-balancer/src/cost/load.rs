use placement_core::{Action, ClusterSnapshot, LoadMetric};

use super::cost_from_array;

/// Skew of one load metric summed per server
#[derive(Debug, Clone)]
pub struct LoadCost {
    metric: LoadMetric,
    region_load: Vec<f64>,
    per_server: Vec<f64>,
}

impl LoadCost {
    pub fn new(metric: LoadMetric) -> Self {
        Self {
            metric,
            region_load: Vec::new(),
            per_server: Vec::new(),
        }
    }

    pub fn metric(&self) -> LoadMetric {
        self.metric
    }

    fn server_sum(&self, snapshot: &ClusterSnapshot, server: usize) -> f64 {
        snapshot
            .regions_on(server)
            .iter()
            .map(|&r| self.region_load[r])
            .sum()
    }

    pub fn init(&mut self, snapshot: &ClusterSnapshot) {
        self.region_load = (0..snapshot.num_regions())
            .map(|r| self.metric.region_load(snapshot.load_history(r)))
            .collect();
        self.per_server = (0..snapshot.num_servers())
            .map(|s| self.server_sum(snapshot, s))
            .collect();
    }

    pub fn update(&mut self, snapshot: &ClusterSnapshot, action: &Action) {
        if let Some((a, b)) = action.touched_servers() {
            self.per_server[a] = self.server_sum(snapshot, a);
            self.per_server[b] = self.server_sum(snapshot, b);
        }
    }

    pub fn cost(&self) -> f64 {
        cost_from_array(&self.per_server)
    }
}
