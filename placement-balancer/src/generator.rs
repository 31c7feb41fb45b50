//! Candidate generators
//!
//! Every server in a snapshot is a legal destination for every placeable
//! region; group constraints are applied by building one snapshot per group.

use placement_core::{Action, ClusterSnapshot, LoadMetric};
use rand::seq::SliceRandom;
use rand::Rng;

/// The closed family of move proposers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateGenerator {
    /// Uniform random move, or a swap when the destination is occupied
    Random,
    /// Most loaded server towards least loaded server
    ///
    /// Servers are ranked by the given metric when the snapshot carries load
    /// history, by region count otherwise.
    Load(Option<LoadMetric>),
    /// Region towards the server holding most of its data
    Locality,
}

impl CandidateGenerator {
    /// Generators that can make progress on `snapshot`
    pub fn for_snapshot(
        snapshot: &ClusterSnapshot,
        load_metric: Option<LoadMetric>,
    ) -> Vec<CandidateGenerator> {
        let mut generators = vec![
            CandidateGenerator::Random,
            CandidateGenerator::Load(load_metric),
        ];
        if snapshot.has_locality() {
            generators.push(CandidateGenerator::Locality);
        }
        generators
    }

    pub fn name(&self) -> &'static str {
        match self {
            CandidateGenerator::Random => "random",
            CandidateGenerator::Load(_) => "load",
            CandidateGenerator::Locality => "locality",
        }
    }

    /// Propose one action, [`Action::Null`] when nothing sensible exists
    pub fn generate<R: Rng + ?Sized>(&self, snapshot: &ClusterSnapshot, rng: &mut R) -> Action {
        if snapshot.num_servers() < 2 || snapshot.placeable_regions().is_empty() {
            return Action::Null;
        }
        match self {
            CandidateGenerator::Random => random_action(snapshot, rng),
            CandidateGenerator::Load(Some(metric)) if snapshot.has_load_history() => {
                metric_load_action(snapshot, *metric, rng)
            }
            CandidateGenerator::Load(_) => load_action(snapshot, rng),
            CandidateGenerator::Locality => locality_action(snapshot, rng),
        }
    }
}

fn other_server<R: Rng + ?Sized>(snapshot: &ClusterSnapshot, server: usize, rng: &mut R) -> usize {
    // uniform over the other num_servers - 1 slots
    let pick = rng.gen_range(0..snapshot.num_servers() - 1);
    if pick >= server {
        pick + 1
    } else {
        pick
    }
}

fn random_action<R: Rng + ?Sized>(snapshot: &ClusterSnapshot, rng: &mut R) -> Action {
    let Some(&region) = snapshot.placeable_regions().choose(rng) else {
        return Action::Null;
    };
    let from_server = snapshot.server_of(region);
    let to_server = other_server(snapshot, from_server, rng);

    let occupants = snapshot.regions_on(to_server);
    if !occupants.is_empty() && rng.gen_bool(0.5) {
        if let Some(&other) = occupants.choose(rng) {
            return Action::SwapRegions {
                region_a: region,
                server_a: from_server,
                region_b: other,
                server_b: to_server,
            };
        }
    }

    Action::MoveRegion {
        region,
        from_server,
        to_server,
    }
}

fn load_action<R: Rng + ?Sized>(snapshot: &ClusterSnapshot, rng: &mut R) -> Action {
    let mut most = 0;
    let mut least = 0;
    for server in 1..snapshot.num_servers() {
        if snapshot.region_count(server) > snapshot.region_count(most) {
            most = server;
        }
        if snapshot.region_count(server) < snapshot.region_count(least) {
            least = server;
        }
    }

    if snapshot.region_count(most) <= snapshot.region_count(least) + 1 {
        return Action::Null;
    }

    match snapshot.regions_on(most).choose(rng) {
        Some(&region) => Action::MoveRegion {
            region,
            from_server: most,
            to_server: least,
        },
        None => Action::Null,
    }
}

fn metric_load_action<R: Rng + ?Sized>(
    snapshot: &ClusterSnapshot,
    metric: LoadMetric,
    rng: &mut R,
) -> Action {
    let server_load = |server: usize| -> f64 {
        snapshot
            .regions_on(server)
            .iter()
            .map(|&r| metric.region_load(snapshot.load_history(r)))
            .sum()
    };

    let loads: Vec<f64> = (0..snapshot.num_servers()).map(server_load).collect();
    let mut most = 0;
    let mut least = 0;
    for (server, &load) in loads.iter().enumerate().skip(1) {
        if load > loads[most] {
            most = server;
        }
        if load < loads[least] {
            least = server;
        }
    }

    if loads[most] <= loads[least] {
        return Action::Null;
    }

    match snapshot.regions_on(most).choose(rng) {
        Some(&region) => Action::MoveRegion {
            region,
            from_server: most,
            to_server: least,
        },
        None => Action::Null,
    }
}

fn locality_action<R: Rng + ?Sized>(snapshot: &ClusterSnapshot, rng: &mut R) -> Action {
    let Some(&region) = snapshot.placeable_regions().choose(rng) else {
        return Action::Null;
    };
    let from_server = snapshot.server_of(region);
    let Some(to_server) = snapshot.most_local_server(region) else {
        return Action::Null;
    };
    if to_server == from_server {
        return Action::Null;
    }

    // never push the destination past the ceiling of the mean
    let ceiling = snapshot
        .placeable_regions()
        .len()
        .div_ceil(snapshot.num_servers());
    if snapshot.region_count(to_server) >= ceiling {
        return Action::Null;
    }

    Action::MoveRegion {
        region,
        from_server,
        to_server,
    }
}
