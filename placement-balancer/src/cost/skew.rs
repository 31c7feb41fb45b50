//! Region count skew, globally and per table

use placement_core::{Action, ClusterSnapshot};

use super::cost_from_array;

/// Skew of per-server region counts
#[derive(Debug, Clone, Default)]
pub struct RegionCountSkewCost {
    counts: Vec<f64>,
}

impl RegionCountSkewCost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, snapshot: &ClusterSnapshot) {
        self.counts = (0..snapshot.num_servers())
            .map(|s| snapshot.region_count(s) as f64)
            .collect();
    }

    pub fn update(&mut self, snapshot: &ClusterSnapshot, action: &Action) {
        if let Some((a, b)) = action.touched_servers() {
            self.counts[a] = snapshot.region_count(a) as f64;
            self.counts[b] = snapshot.region_count(b) as f64;
        }
    }

    pub fn cost(&self) -> f64 {
        cost_from_array(&self.counts)
    }
}

/// Mean over tables of the skew of that table's per-server region counts
#[derive(Debug, Clone, Default)]
pub struct TableSkewCost {
    /// `[table][server]`
    counts: Vec<Vec<f64>>,
    table_costs: Vec<f64>,
}

impl TableSkewCost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, snapshot: &ClusterSnapshot) {
        self.counts = (0..snapshot.num_tables())
            .map(|t| {
                (0..snapshot.num_servers())
                    .map(|s| snapshot.table_count(s, t) as f64)
                    .collect()
            })
            .collect();
        self.table_costs = self.counts.iter().map(|c| cost_from_array(c)).collect();
    }

    pub fn update(&mut self, snapshot: &ClusterSnapshot, action: &Action) {
        match *action {
            Action::MoveRegion {
                region,
                from_server,
                to_server,
            } => {
                self.refresh(snapshot, snapshot.region_table(region), from_server, to_server);
            }
            Action::SwapRegions {
                region_a,
                server_a,
                region_b,
                server_b,
            } => {
                self.refresh(snapshot, snapshot.region_table(region_a), server_a, server_b);
                self.refresh(snapshot, snapshot.region_table(region_b), server_a, server_b);
            }
            Action::Null => {}
        }
    }

    fn refresh(&mut self, snapshot: &ClusterSnapshot, table: usize, a: usize, b: usize) {
        let counts = &mut self.counts[table];
        counts[a] = snapshot.table_count(a, table) as f64;
        counts[b] = snapshot.table_count(b, table) as f64;
        self.table_costs[table] = cost_from_array(counts);
    }

    pub fn cost(&self) -> f64 {
        if self.table_costs.is_empty() {
            return 0.0;
        }
        self.table_costs.iter().sum::<f64>() / self.table_costs.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placement_core::{ClusterState, RegionIdentity, ServerIdentity};

    fn mock_cluster(counts: &[usize], tables: usize) -> ClusterSnapshot {
        let mut next = 0u32;
        let state: ClusterState = counts
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let regions = (0..n)
                    .map(|_| {
                        next += 1;
                        let table = format!("table{}", next as usize % tables);
                        RegionIdentity::new(table.as_str(), &next.to_be_bytes(), &[])
                    })
                    .collect();
                (ServerIdentity::new(format!("srv{:03}", i), 1000, 1), regions)
            })
            .collect();
        ClusterSnapshot::from_state(&state).unwrap()
    }

    fn skew_of(counts: &[usize]) -> f64 {
        let mut cost = RegionCountSkewCost::new();
        cost.init(&mock_cluster(counts, 1));
        cost.cost()
    }

    #[test]
    fn test_skew_cost_balanced_shapes() {
        for counts in [
            [0, 0, 0, 0, 1],
            [0, 0, 0, 1, 1],
            [0, 0, 1, 1, 1],
            [0, 1, 1, 1, 1],
            [1, 1, 1, 1, 1],
        ] {
            assert!(skew_of(&counts) < 0.01, "{:?}", counts);
        }
    }

    #[test]
    fn test_skew_cost_everything_on_one_server() {
        assert!((skew_of(&[10_000, 0, 0, 0, 0]) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_skew_cost_degenerate() {
        assert_eq!(skew_of(&[]), 0.0);
        assert_eq!(skew_of(&[7]), 0.0);
        assert_eq!(skew_of(&[0, 0]), 0.0);
    }

    #[test]
    fn test_skew_cost_bounded() {
        for counts in [vec![3, 0, 9, 1], vec![1, 2, 3, 4, 5, 6], vec![100, 1]] {
            let cost = skew_of(&counts);
            assert!((0.0..=1.0).contains(&cost), "{:?} -> {}", counts, cost);
        }
    }

    #[test]
    fn test_skew_update_matches_init() {
        let mut snapshot = mock_cluster(&[4, 0, 2], 1);
        let mut incremental = RegionCountSkewCost::new();
        incremental.init(&snapshot);

        let region = snapshot.regions_on(0)[0];
        let action = Action::MoveRegion {
            region,
            from_server: 0,
            to_server: 1,
        };
        snapshot.apply(&action).unwrap();
        incremental.update(&snapshot, &action);

        let mut fresh = RegionCountSkewCost::new();
        fresh.init(&snapshot);
        assert_eq!(incremental.cost(), fresh.cost());
    }

    #[test]
    fn test_table_skew_bounded() {
        for counts in [vec![3, 0, 9, 1], vec![1, 2, 3, 4, 5, 6], vec![0, 0, 8]] {
            let mut cost = TableSkewCost::new();
            cost.init(&mock_cluster(&counts, 3));
            let value = cost.cost();
            assert!((0.0..=1.0).contains(&value), "{:?} -> {}", counts, value);
        }
    }

    #[test]
    fn test_table_skew_sees_clustered_table() {
        // global counts are even but each table lives on one server
        let state: ClusterState = (0..2)
            .map(|s| {
                let regions = (0..4u32)
                    .map(|i| RegionIdentity::new(format!("t{}", s).as_str(), &i.to_be_bytes(), &[]))
                    .collect();
                (ServerIdentity::new(format!("srv{}", s), 1, 1), regions)
            })
            .collect();
        let snapshot = ClusterSnapshot::from_state(&state).unwrap();

        let mut global = RegionCountSkewCost::new();
        global.init(&snapshot);
        let mut table = TableSkewCost::new();
        table.init(&snapshot);

        assert!(global.cost() < 0.01);
        assert!((table.cost() - 1.0).abs() < 0.01);
    }
}
