//! Hybrid storage routing across the remote and local tiers.

mod hybrid;

pub use hybrid::{HybridStorage, RestoreOutcome, WriteOutcome};
