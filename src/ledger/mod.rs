pub mod memory;
pub mod models;
pub mod repository;

pub use memory::MemoryRewardLedger;
pub use models::{ClaimItem, RewardRecord, SettlementGroup, SettlementResult};
pub use repository::{PgRewardLedger, RewardLedger};
