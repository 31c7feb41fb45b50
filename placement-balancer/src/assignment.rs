//! Bulk assignment strategies
//!
//! Used at cluster bring-up or full restart, before any cost-driven
//! balancing. Regions with nowhere to go land on [`ServerIdentity::bogus`].

use placement_core::{RegionIdentity, ServerIdentity};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, instrument, warn};

/// Bulk assignment result, `{server → regions}`
pub type Assignment = BTreeMap<ServerIdentity, Vec<RegionIdentity>>;

fn online_servers(servers: &[ServerIdentity]) -> Vec<&ServerIdentity> {
    servers
        .iter()
        .filter(|s| !s.is_bogus())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Spread `regions` across `servers` modulo the server count
///
/// Servers are taken in identity order so the result is deterministic. Every
/// online server appears in the result, with an empty list if it got nothing.
/// With no online servers every region goes to the bogus bucket.
pub fn round_robin_assignment(
    regions: &[RegionIdentity],
    servers: &[ServerIdentity],
) -> Assignment {
    let online = online_servers(servers);
    let mut assignment = Assignment::new();

    if online.is_empty() {
        if !regions.is_empty() {
            warn!(
                regions = regions.len(),
                "No online servers, regions routed to bogus server"
            );
            assignment.insert(ServerIdentity::bogus(), regions.to_vec());
        }
        return assignment;
    }

    for server in &online {
        assignment.insert((*server).clone(), Vec::new());
    }
    for (i, region) in regions.iter().enumerate() {
        let server = online[i % online.len()];
        if let Some(list) = assignment.get_mut(server) {
            list.push(region.clone());
        }
    }

    debug!(
        regions = regions.len(),
        servers = online.len(),
        "Round-robin assignment"
    );
    assignment
}

/// Keep regions where they were when possible, round-robin the rest
///
/// A region stays on its previous server when that exact server is online.
/// When only a restarted process at the same `host:port` is online, the
/// region follows it. A missing previous server (`None`) or one that is gone
/// leaves the region unassigned, and unassigned regions are round-robined.
#[instrument(skip_all, fields(regions = previous.len(), servers = servers.len()))]
pub fn retain_assignment(
    previous: &HashMap<RegionIdentity, Option<ServerIdentity>>,
    servers: &[ServerIdentity],
) -> Assignment {
    let online = online_servers(servers);
    let mut assignment: Assignment = online.iter().map(|s| ((*s).clone(), Vec::new())).collect();

    let mut regions: Vec<(&RegionIdentity, &Option<ServerIdentity>)> = previous.iter().collect();
    regions.sort_by(|a, b| a.0.cmp(b.0));

    let mut unassigned = Vec::new();
    let mut no_previous = 0usize;
    for (region, last) in regions {
        let Some(last) = last else {
            no_previous += 1;
            unassigned.push(region.clone());
            continue;
        };
        let target = if online.contains(&last) {
            Some(last)
        } else {
            // latest start time wins among same-address successors
            online
                .iter()
                .filter(|s| s.same_address(last))
                .max_by_key(|s| s.start_time)
                .copied()
        };
        match target.and_then(|server| assignment.get_mut(server)) {
            Some(list) => list.push(region.clone()),
            None => unassigned.push(region.clone()),
        }
    }

    if no_previous > 0 {
        warn!(count = no_previous, "Regions without a previous server treated as unassigned");
    }

    let retained: usize = assignment.values().map(Vec::len).sum();
    debug!(retained, unassigned = unassigned.len(), "Retain assignment");

    for (server, mut list) in round_robin_assignment(&unassigned, servers) {
        assignment.entry(server).or_default().append(&mut list);
    }
    assignment
}
