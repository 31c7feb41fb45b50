//! Regions and region plans

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::server::ServerIdentity;

/// Name of the table a region belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(pub String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A movable key range of a table
///
/// Equality is table + start key + end key. The numeric index a region gets
/// inside a snapshot is not part of its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionIdentity {
    pub table: TableName,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl RegionIdentity {
    pub fn new(table: impl Into<TableName>, start_key: &[u8], end_key: &[u8]) -> Self {
        Self {
            table: table.into(),
            start_key: start_key.to_vec(),
            end_key: end_key.to_vec(),
        }
    }

    /// Printable name, `table,start,end` with hex keys
    pub fn name(&self) -> String {
        format!(
            "{},{},{}",
            self.table,
            hex_key(&self.start_key),
            hex_key(&self.end_key)
        )
    }
}

fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

impl fmt::Display for RegionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Instruction to move one region between servers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionPlan {
    pub region: RegionIdentity,
    pub source: ServerIdentity,
    pub destination: ServerIdentity,
}

impl RegionPlan {
    pub fn new(
        region: RegionIdentity,
        source: ServerIdentity,
        destination: ServerIdentity,
    ) -> Self {
        Self {
            region,
            source,
            destination,
        }
    }
}

impl fmt::Display for RegionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.region, self.source, self.destination)
    }
}
