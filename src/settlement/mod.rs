// Settlement: run-lock, batching engine and trigger surface
pub mod engine;
pub mod lease;
pub mod triggers;

pub use engine::{EngineConfig, RunReport, SettlementEngine};
pub use lease::{Cache, Lease, MemoryCache, RunLease};
pub use triggers::{ClaimOutcome, RewardService};
