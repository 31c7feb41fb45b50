//! Group constraint layer
//!
//! Servers and tables are partitioned into named groups. Each group is
//! balanced as an independent cluster; a region may only live on a server
//! of its table's group.

use placement_core::{
    Address, ClusterState, RegionIdentity, RegionPlan, ServerIdentity, TableName,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

use crate::assignment::{self, Assignment};
use crate::config::{BalancerConfig, ConfigError};
use crate::engine::{Balancer, ClusterInputs, Result};

/// Group that unmapped tables fall back to for bulk assignment
pub const DEFAULT_GROUP: &str = "default";

/// A named set of servers and the tables they serve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    #[serde(default)]
    pub servers: BTreeSet<Address>,
    #[serde(default)]
    pub tables: BTreeSet<TableName>,
}

impl GroupInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            servers: BTreeSet::new(),
            tables: BTreeSet::new(),
        }
    }

    pub fn with_server(mut self, address: Address) -> Self {
        self.servers.insert(address);
        self
    }

    pub fn with_table(mut self, table: impl Into<TableName>) -> Self {
        self.tables.insert(table.into());
        self
    }

    pub fn contains_server(&self, address: &Address) -> bool {
        self.servers.contains(address)
    }
}

#[derive(Deserialize)]
struct GroupsFile {
    #[serde(default, rename = "group")]
    groups: Vec<GroupInfo>,
}

/// Lookup tables for group membership
///
/// Every server and every table belongs to at most one group.
#[derive(Debug, Clone, Default)]
pub struct GroupMembership {
    groups: BTreeMap<String, GroupInfo>,
    table_group: HashMap<TableName, String>,
    server_group: HashMap<Address, String>,
}

impl GroupMembership {
    pub fn new(
        groups: impl IntoIterator<Item = GroupInfo>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut membership = Self::default();
        for group in groups {
            if membership.groups.contains_key(&group.name) {
                return Err(ConfigError::InvalidValue(
                    "group".to_string(),
                    format!("duplicate group {}", group.name),
                ));
            }
            for table in &group.tables {
                let name = group.name.clone();
                if let Some(other) = membership.table_group.insert(table.clone(), name) {
                    return Err(ConfigError::InvalidValue(
                        format!("group.{}.tables", group.name),
                        format!("table {} already in group {}", table, other),
                    ));
                }
            }
            for server in &group.servers {
                let name = group.name.clone();
                if let Some(other) = membership.server_group.insert(server.clone(), name) {
                    return Err(ConfigError::InvalidValue(
                        format!("group.{}.servers", group.name),
                        format!("server {} already in group {}", server, other),
                    ));
                }
            }
            membership.groups.insert(group.name.clone(), group);
        }
        Ok(membership)
    }

    /// Parse `[[group]]` tables from TOML text
    pub fn from_toml(content: &str) -> std::result::Result<Self, ConfigError> {
        let file: GroupsFile = toml::from_str(content)?;
        Self::new(file.groups)
    }

    pub fn group(&self, name: &str) -> Option<&GroupInfo> {
        self.groups.get(name)
    }

    /// Groups in name order
    pub fn groups(&self) -> impl Iterator<Item = &GroupInfo> {
        self.groups.values()
    }

    /// Group of a table, `None` when it cannot be resolved
    pub fn group_of_table(&self, table: &TableName) -> Option<&GroupInfo> {
        self.table_group.get(table).and_then(|name| self.groups.get(name))
    }

    /// Group of a table, falling back to the default group
    pub fn group_of_table_or_default(&self, table: &TableName) -> Option<&GroupInfo> {
        self.group_of_table(table).or_else(|| self.groups.get(DEFAULT_GROUP))
    }

    pub fn group_of_server(&self, address: &Address) -> Option<&GroupInfo> {
        self.server_group.get(address).and_then(|name| self.groups.get(name))
    }
}

/// Everything one group-aware balancing cycle decided
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupBalanceOutcome {
    /// Cost-driven moves, merged in group-name order
    pub plans: Vec<RegionPlan>,
    /// Regions found outside their table's group
    pub misplaced: HashSet<RegionIdentity>,
    /// Moves bringing misplaced regions back into their group
    pub corrections: Vec<RegionPlan>,
    /// Misplaced regions whose group has no online server
    pub unplaceable: Vec<RegionIdentity>,
    /// Regions whose table maps to no group, left where they are
    pub unresolved: Vec<RegionIdentity>,
}

impl GroupBalanceOutcome {
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
            && self.corrections.is_empty()
            && self.unplaceable.is_empty()
            && self.unresolved.is_empty()
    }

    /// Corrections followed by balancing plans
    pub fn all_plans(&self) -> impl Iterator<Item = &RegionPlan> {
        self.corrections.iter().chain(self.plans.iter())
    }
}

/// Runs assignment and balancing one group at a time
pub struct GroupBalancer {
    config: BalancerConfig,
    membership: GroupMembership,
}

impl GroupBalancer {
    pub fn new(config: BalancerConfig, membership: GroupMembership) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, membership })
    }

    pub fn membership(&self) -> &GroupMembership {
        &self.membership
    }

    fn group_servers(&self, group: &GroupInfo, servers: &[ServerIdentity]) -> Vec<ServerIdentity> {
        servers
            .iter()
            .filter(|s| group.contains_server(&s.address()))
            .cloned()
            .collect()
    }

    /// Regions hosted outside their table's group
    ///
    /// Regions whose group cannot be resolved are never reported.
    pub fn misplaced_regions(
        &self,
        current: &HashMap<RegionIdentity, ServerIdentity>,
    ) -> HashSet<RegionIdentity> {
        let mut misplaced = HashSet::new();
        let mut unresolved = 0usize;
        for (region, server) in current {
            match self.membership.group_of_table(&region.table) {
                Some(group) => {
                    if !group.contains_server(&server.address()) {
                        misplaced.insert(region.clone());
                    }
                }
                None => unresolved += 1,
            }
        }
        if unresolved > 0 {
            warn!(count = unresolved, "Regions with unresolvable group not checked");
        }
        misplaced
    }

    /// Partition regions by group, unresolved ones into the bogus bucket
    fn partition_by_group<'r, I>(
        &self,
        regions: I,
    ) -> (BTreeMap<String, Vec<&'r RegionIdentity>>, Vec<&'r RegionIdentity>)
    where
        I: IntoIterator<Item = &'r RegionIdentity>,
    {
        let mut by_group: BTreeMap<String, Vec<&RegionIdentity>> = BTreeMap::new();
        let mut orphans = Vec::new();
        for region in regions {
            match self.membership.group_of_table_or_default(&region.table) {
                Some(group) => by_group.entry(group.name.clone()).or_default().push(region),
                None => orphans.push(region),
            }
        }
        if !orphans.is_empty() {
            warn!(
                count = orphans.len(),
                "Tables without a group and no default group, regions routed to bogus server"
            );
        }
        (by_group, orphans)
    }

    /// Round-robin each group's regions over that group's online servers
    #[instrument(skip_all, fields(regions = regions.len(), servers = servers.len()))]
    pub fn round_robin_assignment(
        &self,
        regions: &[RegionIdentity],
        servers: &[ServerIdentity],
    ) -> Assignment {
        let (by_group, orphans) = self.partition_by_group(regions);
        let mut result = Assignment::new();

        for (name, group_regions) in by_group {
            let Some(group) = self.membership.group(&name) else {
                continue;
            };
            let group_regions: Vec<RegionIdentity> = group_regions.into_iter().cloned().collect();
            let candidates = self.group_servers(group, servers);
            for (server, list) in assignment::round_robin_assignment(&group_regions, &candidates) {
                result.entry(server).or_default().extend(list);
            }
        }
        if !orphans.is_empty() {
            result
                .entry(ServerIdentity::bogus())
                .or_default()
                .extend(orphans.into_iter().cloned());
        }
        result
    }

    /// Retain each group's regions on their previous servers where legal
    #[instrument(skip_all, fields(regions = previous.len(), servers = servers.len()))]
    pub fn retain_assignment(
        &self,
        previous: &HashMap<RegionIdentity, Option<ServerIdentity>>,
        servers: &[ServerIdentity],
    ) -> Assignment {
        let (by_group, orphans) = self.partition_by_group(previous.keys());
        let mut result = Assignment::new();

        for (name, group_regions) in by_group {
            let Some(group) = self.membership.group(&name) else {
                continue;
            };
            let group_previous: HashMap<RegionIdentity, Option<ServerIdentity>> = group_regions
                .into_iter()
                .map(|r| (r.clone(), previous.get(r).cloned().flatten()))
                .collect();
            let candidates = self.group_servers(group, servers);
            for (server, list) in assignment::retain_assignment(&group_previous, &candidates) {
                result.entry(server).or_default().extend(list);
            }
        }
        if !orphans.is_empty() {
            result
                .entry(ServerIdentity::bogus())
                .or_default()
                .extend(orphans.into_iter().cloned());
        }
        result
    }

    /// Balance a plain `{server → regions}` map group by group
    pub fn balance_cluster(&self, state: &ClusterState) -> Result<GroupBalanceOutcome> {
        self.balance_cluster_with(state, ClusterInputs::default())
    }

    /// Balance every group independently, then bring misplaced regions home
    ///
    /// Each misplaced region goes to the least loaded server of its group as
    /// that group stands after its own plans, so applying every plan of the
    /// outcome keeps each group evenly spread.
    #[instrument(skip_all, fields(servers = state.len()))]
    pub fn balance_cluster_with(
        &self,
        state: &ClusterState,
        inputs: ClusterInputs<'_>,
    ) -> Result<GroupBalanceOutcome> {
        let mut outcome = GroupBalanceOutcome::default();
        let mut group_states: BTreeMap<String, ClusterState> = BTreeMap::new();
        let mut misplaced_by_group: BTreeMap<String, Vec<(RegionIdentity, ServerIdentity)>> =
            BTreeMap::new();

        for server in state.keys() {
            if let Some(group) = self.membership.group_of_server(&server.address()) {
                group_states
                    .entry(group.name.clone())
                    .or_default()
                    .insert(server.clone(), Vec::new());
            }
        }

        for (server, regions) in state {
            for region in regions {
                let Some(group) = self.membership.group_of_table(&region.table) else {
                    outcome.unresolved.push(region.clone());
                    continue;
                };
                if group.contains_server(&server.address()) {
                    if let Some(hosted) = group_states
                        .get_mut(&group.name)
                        .and_then(|g| g.get_mut(server))
                    {
                        hosted.push(region.clone());
                    }
                } else {
                    outcome.misplaced.insert(region.clone());
                    misplaced_by_group
                        .entry(group.name.clone())
                        .or_default()
                        .push((region.clone(), server.clone()));
                }
            }
        }
        if !outcome.unresolved.is_empty() {
            warn!(
                count = outcome.unresolved.len(),
                "Regions with unresolvable group left in place"
            );
        }

        let groups: Vec<(&String, &ClusterState)> = group_states.iter().collect();
        let results: Vec<Option<Vec<RegionPlan>>> = groups
            .par_iter()
            .enumerate()
            .map(|(i, &(name, group_state))| -> Result<Option<Vec<RegionPlan>>> {
                let mut config = self.config.clone();
                config.seed = config.seed.map(|seed| seed.wrapping_add(i as u64));
                let mut balancer = Balancer::new(config)?;
                let plans = balancer.balance_cluster_with(group_state, inputs)?;
                debug!(
                    group = %name,
                    plans = plans.as_ref().map_or(0, Vec::len),
                    "Group balanced"
                );
                Ok(plans)
            })
            .collect::<Result<_>>()?;

        // region counts per group once its own plans are applied
        let mut counts: BTreeMap<&String, BTreeMap<&ServerIdentity, usize>> = group_states
            .iter()
            .map(|(name, g)| (name, g.iter().map(|(s, list)| (s, list.len())).collect()))
            .collect();
        for (&(name, _), plans) in groups.iter().zip(results) {
            let Some(plans) = plans else {
                continue;
            };
            if let Some(group_counts) = counts.get_mut(name) {
                for plan in &plans {
                    if let Some(count) = group_counts.get_mut(&plan.source) {
                        *count = count.saturating_sub(1);
                    }
                    if let Some(count) = group_counts.get_mut(&plan.destination) {
                        *count += 1;
                    }
                }
            }
            outcome.plans.extend(plans);
        }

        for (name, misplaced) in misplaced_by_group {
            let Some(group_counts) = counts.get_mut(&name).filter(|c| !c.is_empty()) else {
                warn!(
                    group = %name,
                    count = misplaced.len(),
                    "Group has no online server for misplaced regions"
                );
                outcome
                    .unplaceable
                    .extend(misplaced.into_iter().map(|(region, _)| region));
                continue;
            };
            for (region, source) in misplaced {
                let Some((&destination, count)) = group_counts.iter_mut().min_by_key(|(_, c)| **c)
                else {
                    continue;
                };
                *count += 1;
                outcome
                    .corrections
                    .push(RegionPlan::new(region, source, destination.clone()));
            }
        }

        info!(
            groups = group_states.len(),
            plans = outcome.plans.len(),
            misplaced = outcome.misplaced.len(),
            corrections = outcome.corrections.len(),
            unplaceable = outcome.unplaceable.len(),
            unresolved = outcome.unresolved.len(),
            "Group balancing finished"
        );
        Ok(outcome)
    }
}
