//! Mock clusters shared by the integration tests

#![allow(dead_code)]

use placement_balancer::{Assignment, BalancerConfig};
use placement_core::{ClusterState, RegionIdentity, RegionPlan, ServerIdentity};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Route balancer logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic config so failures reproduce
pub fn seeded_config(seed: u64) -> BalancerConfig {
    BalancerConfig {
        seed: Some(seed),
        ..Default::default()
    }
}

pub fn server(i: usize) -> ServerIdentity {
    ServerIdentity::new(format!("rs{:03}", i), 16020, 1_000)
}

/// `count` regions of `table` with distinct, sequential keys
pub fn regions(table: &str, first: u32, count: u32) -> Vec<RegionIdentity> {
    (first..first + count)
        .map(|i| RegionIdentity::new(table, &i.to_be_bytes(), &(i + 1).to_be_bytes()))
        .collect()
}

/// Random regions spread over `tables` tables
pub fn random_regions(count: usize, tables: usize, rng: &mut StdRng) -> Vec<RegionIdentity> {
    (0..count)
        .map(|i| {
            let table = format!("table{}", rng.gen_range(0..tables.max(1)));
            let start: u64 = rng.gen();
            RegionIdentity::new(table.as_str(), &start.to_be_bytes(), &(i as u64).to_be_bytes())
        })
        .collect()
}

/// One server per entry of `counts`, holding that many regions of one table
pub fn mock_cluster(counts: &[usize]) -> ClusterState {
    let mut next = 0u32;
    counts
        .iter()
        .enumerate()
        .map(|(i, &n)| {
            let list = regions("usertable", next, n as u32);
            next += n as u32;
            (server(i), list)
        })
        .collect()
}

/// Same as [`mock_cluster`] with regions drawn from several tables
pub fn mock_cluster_tables(counts: &[usize], tables: usize, seed: u64) -> ClusterState {
    let mut rng = StdRng::seed_from_u64(seed);
    counts
        .iter()
        .enumerate()
        .map(|(i, &n)| (server(i), random_regions(n, tables, &mut rng)))
        .collect()
}

/// Apply plans to a cluster state as the caller would
pub fn reconcile(state: &ClusterState, plans: &[RegionPlan]) -> ClusterState {
    let mut result = state.clone();
    for plan in plans {
        if let Some(list) = result.get_mut(&plan.source) {
            list.retain(|r| r != &plan.region);
        }
        result
            .entry(plan.destination.clone())
            .or_default()
            .push(plan.region.clone());
    }
    result
}

/// Every server holds floor(avg) or ceil(avg) regions
pub fn assert_balanced(state: &BTreeMap<ServerIdentity, Vec<RegionIdentity>>) {
    let total: usize = state.values().map(Vec::len).sum();
    if state.is_empty() {
        return;
    }
    let floor = total / state.len();
    let ceil = total.div_ceil(state.len());
    for (server, list) in state {
        assert!(
            list.len() == floor || list.len() == ceil,
            "{} holds {} regions, expected {} or {} ({:?})",
            server,
            list.len(),
            floor,
            ceil,
            state.values().map(Vec::len).collect::<Vec<_>>()
        );
    }
}

pub fn region_count(assignment: &Assignment) -> usize {
    assignment.values().map(Vec::len).sum()
}
