//! Raft-style leader election (spec §4.I): a single leader serializes HWM
//! commits across the cluster; `⌊N/2⌋ + 1` cosigners (the same quorum size
//! enforced at config validation, see `registry::ClusterConfig::validate`)
//! must be reachable to elect one or replicate an entry.

pub mod election;
pub mod state;

pub use election::RaftDriver;
pub use state::{RaftState, Role};
