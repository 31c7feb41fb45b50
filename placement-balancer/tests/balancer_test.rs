//! End-to-end balancing scenarios
//!
//! Run with: cargo test --package placement-balancer --test balancer_test

mod common;

use common::*;
use placement_balancer::{
    Balancer, BalancerConfig, CandidateGenerator, ClusterInputs, CostModel, SearchPhase,
};
use placement_core::{
    ClusterSnapshot, ClusterState, LoadHistoryStore, LocalityMap, RegionIdentity,
    RegionLoadSample, RegionPlan, ServerIdentity,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

/// Region counts per server, from balanced to heavily skewed
const CLUSTER_MOCKS: &[&[usize]] = &[
    &[0],
    &[1],
    &[10],
    &[0, 0],
    &[0, 1],
    &[1, 1],
    &[0, 1, 10],
    &[1, 1, 1, 1],
    &[0, 0, 0, 1],
    &[10, 1, 1, 1, 1],
    &[0, 0, 0, 1, 10],
    &[4, 4, 4, 0],
    &[12, 1, 0, 3],
    &[0, 20, 0, 0, 3],
    &[5, 5, 5, 5, 5, 5, 40],
];

fn balance(config: BalancerConfig, state: &ClusterState) -> Option<Vec<RegionPlan>> {
    let mut balancer = Balancer::new(config).unwrap();
    balancer.balance_cluster(state).unwrap()
}

#[test]
fn test_balanced_cluster_needs_no_plan() {
    init_tracing();
    let mut balancer = Balancer::new(seeded_config(1)).unwrap();
    let state = mock_cluster(&[3, 3, 3]);

    let snapshot = ClusterSnapshot::from_state(&state).unwrap();
    assert_eq!(balancer.compute_cost(&snapshot), 0.0);
    assert!(balancer.balance_cluster(&state).unwrap().is_none());
    assert_eq!(balancer.phase(), SearchPhase::Done);
}

#[test]
fn test_imbalanced_cluster_is_balanced() {
    init_tracing();
    let state = mock_cluster(&[0, 2, 2, 2, 2]);
    let plans = balance(seeded_config(2), &state).expect("imbalanced cluster must produce a plan");
    assert!(!plans.is_empty());

    let balanced = reconcile(&state, &plans);
    for list in balanced.values() {
        assert!((1..=2).contains(&list.len()), "{:?}", balanced);
    }
}

#[test]
fn test_mock_clusters_end_balanced() {
    init_tracing();
    let config = BalancerConfig {
        min_cost_need_balance: 0.0,
        ..seeded_config(3)
    };
    for counts in CLUSTER_MOCKS {
        let state = mock_cluster(counts);
        let plans = balance(config.clone(), &state).unwrap_or_default();
        assert_balanced(&reconcile(&state, &plans));
    }
}

#[test]
fn test_second_run_is_noop() {
    init_tracing();
    for counts in CLUSTER_MOCKS {
        let state = mock_cluster(counts);
        let plans = balance(seeded_config(4), &state).unwrap_or_default();
        let balanced = reconcile(&state, &plans);
        assert!(
            balance(seeded_config(5), &balanced).is_none(),
            "second run moved regions for {:?}",
            counts
        );
    }
}

#[test]
fn test_high_threshold_never_balances() {
    let config = BalancerConfig {
        min_cost_need_balance: 1.0,
        ..seeded_config(6)
    };
    for counts in CLUSTER_MOCKS {
        assert!(balance(config.clone(), &mock_cluster(counts)).is_none());
    }
}

#[test]
fn test_plans_only_for_moved_regions() {
    let state = mock_cluster(&[12, 0, 0]);
    let plans = balance(seeded_config(7), &state).unwrap();
    let mut seen = HashSet::new();
    for plan in &plans {
        assert_ne!(plan.source, plan.destination);
        assert!(state[&plan.source].contains(&plan.region));
        assert!(seen.insert(plan.region.clone()), "region planned twice");
    }
}

#[test]
fn test_coprocessor_hot_server_spreads() {
    init_tracing();
    let mut config = seeded_config(8);
    config.weights.coprocessor_request = 10_000.0;

    let server_a = ServerIdentity::new("srv-a", 16020, 1);
    let server_b = ServerIdentity::new("srv-b", 16020, 1);
    let server_c = ServerIdentity::new("srv-c", 16020, 1);
    let on_a = regions("cp", 0, 3);
    let on_b = regions("cp", 3, 3);
    let on_c = regions("cp", 6, 3);

    let loads = LoadHistoryStore::new();
    let sample = |cp: u64| RegionLoadSample {
        coprocessor_requests: cp,
        ..Default::default()
    };
    for region in &on_a {
        loads.record(region, sample(0));
        loads.record(region, sample(1000));
    }
    for region in on_b.iter().chain(on_c.iter()) {
        loads.record(region, sample(0));
        loads.record(region, sample(0));
    }

    let mut state = ClusterState::new();
    state.insert(server_a.clone(), on_a);
    state.insert(server_b, on_b);
    state.insert(server_c, on_c);

    let mut balancer = Balancer::new(config).unwrap();
    let inputs = ClusterInputs {
        loads: Some(&loads),
        ..Default::default()
    };
    let plans = balancer.balance_cluster_with(&state, inputs).unwrap().unwrap();

    let from_a: Vec<_> = plans.iter().filter(|p| p.source == server_a).collect();
    let targets: HashSet<_> = from_a.iter().map(|p| p.destination.clone()).collect();
    assert_eq!(from_a.len(), 2, "{:?}", plans);
    assert_eq!(targets.len(), 2);
    assert!(!targets.contains(&server_a));
}

#[test]
fn test_restarted_server_entry_needs_no_plan() {
    init_tracing();
    let state = mock_cluster_tables(&[3, 3, 14], 2, 9);
    let plans = balance(seeded_config(9), &state).expect("skewed cluster must produce a plan");
    let mut balanced = reconcile(&state, &plans);
    assert_balanced(&balanced);

    let first = balanced.keys().next().unwrap().clone();
    let dead = ServerIdentity::new(first.host.clone(), first.port, first.start_time - 100);
    balanced.insert(dead, Vec::new());
    assert!(balance(seeded_config(10), &balanced).is_none());
}

#[test]
fn test_single_local_server() {
    let server = ServerIdentity::new("only", 16020, 1);
    let region = RegionIdentity::new("t", b"a", b"b");
    let mut state = ClusterState::new();
    state.insert(server.clone(), vec![region.clone()]);

    let locality = LocalityMap::new().with(&region, &server, 1.0);
    let snapshot = ClusterSnapshot::builder(&state)
        .with_locality(&locality)
        .build()
        .unwrap();
    let model = {
        let mut model = CostModel::from_config(&BalancerConfig::default());
        model.init(&snapshot);
        model
    };
    for (name, cost) in model.breakdown() {
        if name == "server_locality" {
            assert_eq!(cost, 0.0);
        }
    }

    let mut balancer = Balancer::new(seeded_config(11)).unwrap();
    let inputs = ClusterInputs {
        locality: Some(&locality),
        ..Default::default()
    };
    assert!(balancer.balance_cluster_with(&state, inputs).unwrap().is_none());

    // the server goes away: the region has nowhere to go
    let mut offline = ClusterState::new();
    offline.insert(ServerIdentity::bogus(), vec![region.clone()]);
    let mut snapshot = ClusterSnapshot::builder(&offline)
        .with_locality(&locality)
        .build()
        .unwrap();
    assert_eq!(snapshot.unplaceable_regions(), vec![&region]);
    assert!(balancer.balance_snapshot(&mut snapshot).unwrap().is_none());
    assert_eq!(balancer.unplaceable_regions(), &[region]);
}

fn locality_cost(state: &ClusterState, locality: &LocalityMap) -> f64 {
    let snapshot = ClusterSnapshot::builder(state)
        .with_locality(locality)
        .build()
        .unwrap();
    let mut model = CostModel::from_config(&BalancerConfig::default());
    model.init(&snapshot);
    model
        .breakdown()
        .into_iter()
        .find(|(name, _)| *name == "server_locality")
        .map(|(_, cost)| cost)
        .unwrap()
}

#[test]
fn test_search_moves_regions_towards_their_data() {
    init_tracing();
    let servers: Vec<ServerIdentity> = (0..3).map(server).collect();
    let hosted = regions("t", 0, 3);

    let mut state = ClusterState::new();
    state.insert(servers[0].clone(), hosted.clone());
    state.insert(servers[1].clone(), Vec::new());
    state.insert(servers[2].clone(), Vec::new());

    // region i keeps its data on server i
    let mut locality = LocalityMap::new();
    for (region, server) in hosted.iter().zip(&servers) {
        locality.set(region, server, 1.0);
    }

    let mut balancer = Balancer::new(seeded_config(13)).unwrap();
    let inputs = ClusterInputs {
        locality: Some(&locality),
        ..Default::default()
    };
    let plans = balancer.balance_cluster_with(&state, inputs).unwrap().unwrap();
    let balanced = reconcile(&state, &plans);
    assert_balanced(&balanced);

    let before = locality_cost(&state, &locality);
    let after = locality_cost(&balanced, &locality);
    assert!(before > 0.5, "initial locality cost {}", before);
    assert!(after < before, "locality cost {} -> {}", before, after);
}

#[test]
fn test_empty_cluster() {
    assert!(balance(seeded_config(12), &ClusterState::new()).is_none());
    assert!(balance(seeded_config(12), &mock_cluster(&[0, 0, 0])).is_none());
}

fn undo_config() -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.weights.read_request = 50.0;
    config.weights.store_file_size = 50.0;
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_undo_restores_cost_exactly(
        counts in prop::collection::vec(0usize..12, 2..6),
        tables in 1usize..4,
        seed in any::<u64>(),
    ) {
        let state = mock_cluster_tables(&counts, tables, seed);
        let servers: Vec<ServerIdentity> = state.keys().cloned().collect();

        let mut locality = LocalityMap::new();
        let loads = LoadHistoryStore::new();
        for (i, region) in state.values().flatten().enumerate() {
            locality.set(region, &servers[i % servers.len()], (i % 7) as f32 / 6.0);
            for step in 0..3u64 {
                loads.record(region, RegionLoadSample {
                    read_requests: step * (i as u64 + 1),
                    store_file_size_mb: (i as u64 * 13) % 17,
                    ..Default::default()
                });
            }
        }

        let mut snapshot = ClusterSnapshot::builder(&state)
            .with_locality(&locality)
            .with_loads(&loads)
            .build()
            .unwrap();
        let config = undo_config();
        let mut model = CostModel::from_config(&config);
        model.init(&snapshot);

        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..20 {
            let expected = model.total_cost();
            let action = CandidateGenerator::Random.generate(&snapshot, &mut rng);
            snapshot.apply(&action).unwrap();
            model.cost_after_action(&snapshot, &action);
            let undo = action.undo();
            snapshot.apply(&undo).unwrap();
            let actual = model.cost_after_action(&snapshot, &undo);
            prop_assert_eq!(expected, actual);

            let mut fresh = CostModel::from_config(&config);
            fresh.init(&snapshot);
            prop_assert_eq!(fresh.total_cost(), actual);
        }
        snapshot.verify().unwrap();
    }

    #[test]
    fn prop_balance_reaches_floor_or_ceiling(
        counts in prop::collection::vec(0usize..16, 2..6),
        seed in any::<u64>(),
    ) {
        let config = BalancerConfig {
            min_cost_need_balance: 0.0,
            max_steps: 50_000,
            ..seeded_config(seed)
        };
        let state = mock_cluster(&counts);
        let plans = balance(config, &state).unwrap_or_default();
        assert_balanced(&reconcile(&state, &plans));
    }

    #[test]
    fn prop_plans_respect_move_budget(
        counts in prop::collection::vec(0usize..20, 2..5),
        budget in 1usize..6,
        seed in any::<u64>(),
    ) {
        let mut config = seeded_config(seed);
        config.move_budget.min_max_moves = budget;
        config.move_budget.max_max_moves = budget;
        let state = mock_cluster(&counts);
        let plans = balance(config, &state).unwrap_or_default();
        prop_assert!(plans.len() <= budget);
    }
}
