//! Reversible snapshot mutations
//!
//! Indices refer to the snapshot the action was generated for.

use serde::{Deserialize, Serialize};

/// A single trial step of the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Move `region` from `from_server` to `to_server`
    MoveRegion {
        region: usize,
        from_server: usize,
        to_server: usize,
    },
    /// `region_a` (on `server_a`) and `region_b` (on `server_b`) trade places
    SwapRegions {
        region_a: usize,
        server_a: usize,
        region_b: usize,
        server_b: usize,
    },
    /// No legal move exists
    Null,
}

impl Action {
    /// The action that exactly reverses this one
    pub fn undo(&self) -> Action {
        match *self {
            Action::MoveRegion {
                region,
                from_server,
                to_server,
            } => Action::MoveRegion {
                region,
                from_server: to_server,
                to_server: from_server,
            },
            Action::SwapRegions {
                region_a,
                server_a,
                region_b,
                server_b,
            } => Action::SwapRegions {
                region_a,
                server_a: server_b,
                region_b,
                server_b: server_a,
            },
            Action::Null => Action::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Action::Null)
    }

    /// Servers whose hosted set changes when this action applies
    pub fn touched_servers(&self) -> Option<(usize, usize)> {
        match *self {
            Action::MoveRegion {
                from_server,
                to_server,
                ..
            } => Some((from_server, to_server)),
            Action::SwapRegions {
                server_a, server_b, ..
            } => Some((server_a, server_b)),
            Action::Null => None,
        }
    }
}
