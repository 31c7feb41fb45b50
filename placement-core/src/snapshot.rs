//! Cluster snapshot
//!
//! A point-in-time, index-based view of servers, regions, tables and racks
//! built fresh for every balancing cycle. The search mutates it in place
//! through [`Action`]s; `assignment` and `regions_per_server` are updated
//! together so that applying an action and then its undo restores every
//! field exactly.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::action::Action;
use crate::error::{PlacementError, Result};
use crate::load::{LoadHistoryStore, RegionLoadSample};
use crate::region::{RegionIdentity, RegionPlan, TableName};
use crate::server::{Address, ServerIdentity};
use crate::topology::{LocalitySource, RackResolver, DEFAULT_RACK};

/// Assignment value of a region that has no legal server
pub const UNPLACEABLE: usize = usize::MAX;

/// `{server -> [regions]}` as reported by the membership service
pub type ClusterState = BTreeMap<ServerIdentity, Vec<RegionIdentity>>;

/// Builder for [`ClusterSnapshot`]
pub struct SnapshotBuilder<'a> {
    state: &'a ClusterState,
    unplaceable: Vec<RegionIdentity>,
    locality: Option<&'a dyn LocalitySource>,
    racks: Option<&'a dyn RackResolver>,
    loads: Option<&'a LoadHistoryStore>,
}

impl<'a> SnapshotBuilder<'a> {
    /// Regions that belong to this snapshot but have no legal server
    pub fn with_unplaceable(mut self, regions: Vec<RegionIdentity>) -> Self {
        self.unplaceable = regions;
        self
    }

    pub fn with_locality(mut self, source: &'a dyn LocalitySource) -> Self {
        self.locality = Some(source);
        self
    }

    pub fn with_racks(mut self, resolver: &'a dyn RackResolver) -> Self {
        self.racks = Some(resolver);
        self
    }

    pub fn with_loads(mut self, store: &'a LoadHistoryStore) -> Self {
        self.loads = Some(store);
        self
    }

    pub fn build(self) -> Result<ClusterSnapshot> {
        // Collapse entries sharing host:port into one slot; latest start wins.
        let mut servers: Vec<ServerIdentity> = Vec::new();
        let mut server_index: HashMap<Address, usize> = HashMap::new();
        let mut hosted: Vec<Vec<&RegionIdentity>> = Vec::new();
        let mut unplaceable: Vec<&RegionIdentity> = self.unplaceable.iter().collect();

        for (server, regions) in self.state {
            if server.is_bogus() {
                unplaceable.extend(regions.iter());
                continue;
            }
            let existing = server_index.get(&server.address()).copied();
            let slot = match existing {
                Some(slot) => {
                    if server.supersedes(&servers[slot]) {
                        debug!(old = %servers[slot], new = %server, "Server superseded by restart");
                        servers[slot] = server.clone();
                    }
                    slot
                }
                None => {
                    server_index.insert(server.address(), servers.len());
                    servers.push(server.clone());
                    hosted.push(Vec::new());
                    servers.len() - 1
                }
            };
            hosted[slot].extend(regions.iter());
        }

        let mut regions: Vec<RegionIdentity> = Vec::new();
        let mut assignment: Vec<usize> = Vec::new();
        let mut seen: HashSet<&RegionIdentity> = HashSet::new();

        for (slot, list) in hosted.iter().enumerate() {
            for &region in list {
                if !seen.insert(region) {
                    return Err(PlacementError::DuplicateRegion(region.name()));
                }
                regions.push(region.clone());
                assignment.push(slot);
            }
        }
        for &region in &unplaceable {
            if !seen.insert(region) {
                return Err(PlacementError::DuplicateRegion(region.name()));
            }
            regions.push(region.clone());
            assignment.push(UNPLACEABLE);
        }
        if !unplaceable.is_empty() {
            warn!(
                count = unplaceable.len(),
                "Snapshot contains regions with no legal server"
            );
        }

        let mut tables: Vec<TableName> = Vec::new();
        let mut table_index: HashMap<TableName, usize> = HashMap::new();
        let region_table: Vec<usize> = regions
            .iter()
            .map(|r| {
                *table_index.entry(r.table.clone()).or_insert_with(|| {
                    tables.push(r.table.clone());
                    tables.len() - 1
                })
            })
            .collect();

        let mut racks: Vec<String> = Vec::new();
        let mut server_rack = Vec::with_capacity(servers.len());
        for server in &servers {
            let rack = match self.racks {
                Some(resolver) => resolver.rack_of(server),
                None => DEFAULT_RACK.to_string(),
            };
            let idx = match racks.iter().position(|r| *r == rack) {
                Some(idx) => idx,
                None => {
                    racks.push(rack);
                    racks.len() - 1
                }
            };
            server_rack.push(idx);
        }

        let locality: Option<Vec<Vec<f32>>> = self.locality.map(|source| {
            regions
                .iter()
                .map(|r| servers.iter().map(|s| source.locality(r, s)).collect())
                .collect()
        });
        let rack_locality = locality.as_ref().map(|per_server| {
            per_server
                .iter()
                .map(|row| {
                    let mut best = vec![0.0f32; racks.len()];
                    for (server, fraction) in row.iter().enumerate() {
                        let rack = server_rack[server];
                        best[rack] = best[rack].max(*fraction);
                    }
                    best
                })
                .collect()
        });

        let load_history: Vec<Vec<RegionLoadSample>> = match self.loads {
            Some(store) => regions.iter().map(|r| store.history(r)).collect(),
            None => vec![Vec::new(); regions.len()],
        };

        let mut snapshot = ClusterSnapshot {
            placeable: (0..regions.len())
                .filter(|&r| assignment[r] != UNPLACEABLE)
                .collect(),
            regions_per_server: vec![Vec::new(); servers.len()],
            regions_per_server_per_table: vec![vec![0; tables.len()]; servers.len()],
            initial_assignment: assignment.clone(),
            assignment,
            num_moved_regions: 0,
            servers,
            regions,
            tables,
            region_table,
            racks,
            server_rack,
            locality,
            rack_locality,
            load_history,
        };
        for region in 0..snapshot.regions.len() {
            let server = snapshot.assignment[region];
            if server != UNPLACEABLE {
                snapshot.regions_per_server[server].push(region);
                snapshot.regions_per_server_per_table[server][snapshot.region_table[region]] += 1;
            }
        }
        for list in &mut snapshot.regions_per_server {
            list.sort_unstable();
        }

        debug!(
            servers = snapshot.num_servers(),
            regions = snapshot.num_regions(),
            tables = snapshot.num_tables(),
            racks = snapshot.num_racks(),
            "Built cluster snapshot"
        );

        Ok(snapshot)
    }
}

/// Index-based view of the cluster for one balancing cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSnapshot {
    servers: Vec<ServerIdentity>,
    regions: Vec<RegionIdentity>,
    tables: Vec<TableName>,
    region_table: Vec<usize>,
    racks: Vec<String>,
    server_rack: Vec<usize>,
    /// Regions that can be selected as move sources
    placeable: Vec<usize>,
    initial_assignment: Vec<usize>,
    assignment: Vec<usize>,
    /// Inverse of `assignment`, each list kept sorted
    regions_per_server: Vec<Vec<usize>>,
    regions_per_server_per_table: Vec<Vec<usize>>,
    num_moved_regions: usize,
    /// `[region][server]`
    locality: Option<Vec<Vec<f32>>>,
    /// `[region][rack]`, best server locality within the rack
    rack_locality: Option<Vec<Vec<f32>>>,
    load_history: Vec<Vec<RegionLoadSample>>,
}

impl ClusterSnapshot {
    pub fn builder(state: &ClusterState) -> SnapshotBuilder<'_> {
        SnapshotBuilder {
            state,
            unplaceable: Vec::new(),
            locality: None,
            racks: None,
            loads: None,
        }
    }

    /// Snapshot with no locality, rack or load information
    pub fn from_state(state: &ClusterState) -> Result<Self> {
        Self::builder(state).build()
    }

    // ===== Dimensions =====

    pub fn num_servers(&self) -> usize {
        self.servers.len()
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn num_racks(&self) -> usize {
        self.racks.len()
    }

    // ===== Identities =====

    pub fn servers(&self) -> &[ServerIdentity] {
        &self.servers
    }

    pub fn server(&self, index: usize) -> &ServerIdentity {
        &self.servers[index]
    }

    pub fn regions(&self) -> &[RegionIdentity] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> &RegionIdentity {
        &self.regions[index]
    }

    pub fn region_table(&self, region: usize) -> usize {
        self.region_table[region]
    }

    pub fn rack_of_server(&self, server: usize) -> usize {
        self.server_rack[server]
    }

    // ===== Assignment =====

    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    pub fn initial_assignment(&self) -> &[usize] {
        &self.initial_assignment
    }

    pub fn server_of(&self, region: usize) -> usize {
        self.assignment[region]
    }

    pub fn regions_on(&self, server: usize) -> &[usize] {
        &self.regions_per_server[server]
    }

    pub fn region_count(&self, server: usize) -> usize {
        self.regions_per_server[server].len()
    }

    pub fn table_count(&self, server: usize, table: usize) -> usize {
        self.regions_per_server_per_table[server][table]
    }

    pub fn placeable_regions(&self) -> &[usize] {
        &self.placeable
    }

    pub fn unplaceable_regions(&self) -> Vec<&RegionIdentity> {
        self.assignment
            .iter()
            .enumerate()
            .filter(|(_, &server)| server == UNPLACEABLE)
            .map(|(region, _)| &self.regions[region])
            .collect()
    }

    /// Regions currently away from the server they started the cycle on
    pub fn num_moved_regions(&self) -> usize {
        self.num_moved_regions
    }

    // ===== Locality & load =====

    pub fn has_locality(&self) -> bool {
        self.locality.is_some()
    }

    pub fn locality(&self, region: usize, server: usize) -> f32 {
        self.locality
            .as_ref()
            .map(|l| l[region][server])
            .unwrap_or(0.0)
    }

    pub fn rack_locality(&self, region: usize, rack: usize) -> f32 {
        self.rack_locality
            .as_ref()
            .map(|l| l[region][rack])
            .unwrap_or(0.0)
    }

    /// Server where the region has the highest locality, if any is known
    pub fn most_local_server(&self, region: usize) -> Option<usize> {
        let row = self.locality.as_ref()?.get(region)?;
        let mut best: Option<(usize, f32)> = None;
        for (server, &fraction) in row.iter().enumerate() {
            if fraction > 0.0 && best.map_or(true, |(_, b)| fraction > b) {
                best = Some((server, fraction));
            }
        }
        best.map(|(server, _)| server)
    }

    pub fn has_load_history(&self) -> bool {
        self.load_history.iter().any(|h| !h.is_empty())
    }

    pub fn load_history(&self, region: usize) -> &[RegionLoadSample] {
        &self.load_history[region]
    }

    // ===== Mutation =====

    /// Apply an action in place
    ///
    /// An action that does not match the current assignment is an internal
    /// fault: the snapshot is left untouched and an invariant error returned.
    pub fn apply(&mut self, action: &Action) -> Result<()> {
        match *action {
            Action::MoveRegion {
                region,
                from_server,
                to_server,
            } => {
                self.check_placement(region, from_server)?;
                self.check_server(to_server)?;
                self.move_region(region, from_server, to_server);
            }
            Action::SwapRegions {
                region_a,
                server_a,
                region_b,
                server_b,
            } => {
                self.check_placement(region_a, server_a)?;
                self.check_placement(region_b, server_b)?;
                if region_a == region_b {
                    return Err(PlacementError::InvariantViolation(format!(
                        "swap of region {} with itself",
                        region_a
                    )));
                }
                self.move_region(region_a, server_a, server_b);
                self.move_region(region_b, server_b, server_a);
            }
            Action::Null => {}
        }
        Ok(())
    }

    fn check_server(&self, server: usize) -> Result<()> {
        if server >= self.servers.len() {
            return Err(PlacementError::UnknownServer {
                index: server,
                count: self.servers.len(),
            });
        }
        Ok(())
    }

    fn check_placement(&self, region: usize, server: usize) -> Result<()> {
        if region >= self.regions.len() {
            return Err(PlacementError::UnknownRegion {
                index: region,
                count: self.regions.len(),
            });
        }
        self.check_server(server)?;
        if self.assignment[region] != server {
            return Err(PlacementError::InvariantViolation(format!(
                "region {} is on server {}, action expects {}",
                region, self.assignment[region], server
            )));
        }
        Ok(())
    }

    fn move_region(&mut self, region: usize, from: usize, to: usize) {
        if from == to {
            return;
        }
        let table = self.region_table[region];

        let list = &mut self.regions_per_server[from];
        if let Ok(pos) = list.binary_search(&region) {
            list.remove(pos);
        }
        let list = &mut self.regions_per_server[to];
        if let Err(pos) = list.binary_search(&region) {
            list.insert(pos, region);
        }

        self.regions_per_server_per_table[from][table] -= 1;
        self.regions_per_server_per_table[to][table] += 1;

        let initial = self.initial_assignment[region];
        if from == initial {
            self.num_moved_regions += 1;
        }
        if to == initial {
            self.num_moved_regions -= 1;
        }

        self.assignment[region] = to;
    }

    /// Full consistency check of the derived indexes
    pub fn verify(&self) -> Result<()> {
        let fault = |msg: String| Err(PlacementError::InvariantViolation(msg));

        let mut listed = vec![0usize; self.regions.len()];
        for (server, list) in self.regions_per_server.iter().enumerate() {
            if list.windows(2).any(|w| w[0] >= w[1]) {
                return fault(format!("server {} region list not strictly sorted", server));
            }
            let mut per_table = vec![0usize; self.tables.len()];
            for &region in list {
                if self.assignment[region] != server {
                    return fault(format!(
                        "server {} lists region {} assigned to {}",
                        server, region, self.assignment[region]
                    ));
                }
                listed[region] += 1;
                per_table[self.region_table[region]] += 1;
            }
            if per_table != self.regions_per_server_per_table[server] {
                return fault(format!("server {} table counts drifted", server));
            }
        }

        let mut moved = 0;
        for (region, &server) in self.assignment.iter().enumerate() {
            let expected = if server == UNPLACEABLE { 0 } else { 1 };
            if listed[region] != expected {
                return fault(format!(
                    "region {} listed {} times, expected {}",
                    region, listed[region], expected
                ));
            }
            if server != self.initial_assignment[region] {
                moved += 1;
            }
        }
        if moved != self.num_moved_regions {
            return fault(format!(
                "moved counter {} disagrees with assignment ({})",
                self.num_moved_regions, moved
            ));
        }
        Ok(())
    }

    // ===== Output =====

    /// One plan per region whose server differs from the cycle's start
    pub fn region_plans(&self) -> Vec<RegionPlan> {
        self.assignment
            .iter()
            .zip(self.initial_assignment.iter())
            .enumerate()
            .filter(|(_, (now, before))| now != before)
            .filter(|(_, (now, before))| **now != UNPLACEABLE && **before != UNPLACEABLE)
            .map(|(region, (&now, &before))| {
                RegionPlan::new(
                    self.regions[region].clone(),
                    self.servers[before].clone(),
                    self.servers[now].clone(),
                )
            })
            .collect()
    }

    /// Current assignment in the caller's `{server -> [regions]}` shape
    pub fn to_cluster_state(&self) -> ClusterState {
        self.servers
            .iter()
            .enumerate()
            .map(|(server, identity)| {
                let regions = self.regions_per_server[server]
                    .iter()
                    .map(|&r| self.regions[r].clone())
                    .collect();
                (identity.clone(), regions)
            })
            .collect()
    }
}
