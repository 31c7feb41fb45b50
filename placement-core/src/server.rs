//! Server identities
//!
//! A server is a process hosting regions. Two processes on the same
//! `host:port` are told apart by their start time; the later one wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a server process, without its start time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of a server process
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub host: String,
    pub port: u16,
    /// Logical start time of the process
    pub start_time: i64,
}

impl ServerIdentity {
    pub fn new(host: impl Into<String>, port: u16, start_time: i64) -> Self {
        Self {
            host: host.into(),
            port,
            start_time,
        }
    }

    /// Sentinel destination for regions that have no legal server
    pub fn bogus() -> Self {
        Self::new("localhost", 1, -1)
    }

    pub fn is_bogus(&self) -> bool {
        *self == Self::bogus()
    }

    pub fn address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }

    /// Same `host:port`, regardless of start time
    pub fn same_address(&self, other: &ServerIdentity) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// True when `self` is a later incarnation of `other`
    pub fn supersedes(&self, other: &ServerIdentity) -> bool {
        self.same_address(other) && self.start_time > other.start_time
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.host, self.port, self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supersedes() {
        let old = ServerIdentity::new("rs1", 16020, 100);
        let new = ServerIdentity::new("rs1", 16020, 200);
        let other = ServerIdentity::new("rs2", 16020, 300);

        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
        assert!(!other.supersedes(&old));
        assert!(!new.supersedes(&new));
    }

    #[test]
    fn test_bogus_server() {
        let bogus = ServerIdentity::bogus();
        assert!(bogus.is_bogus());
        assert_eq!(bogus.to_string(), "localhost,1,-1");
        assert!(!ServerIdentity::new("localhost", 1, 0).is_bogus());
    }

    #[test]
    fn test_address_display() {
        let server = ServerIdentity::new("rs7", 16020, 1);
        assert_eq!(server.address().to_string(), "rs7:16020");
    }
}
