use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One (user, wallet, asset) reward position - THE source of truth for
/// unclaimed balances.
///
/// `temporary_tokens` is only mutated through the ledger's atomic increment
/// operation; `converted_tokens` mirrors what is already confirmed on-chain
/// and is refreshed by the wallet re-sync collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardRecord {
    pub user_id: Uuid,
    pub wallet_address: String,
    pub asset_id: u64,
    pub temporary_tokens: u64,
    pub converted_tokens: u64,
    pub updated_at: DateTime<Utc>,
}

impl RewardRecord {
    /// Off-chain + on-chain balance, used by receiver-wallet selection
    pub fn combined_balance(&self) -> u64 {
        self.temporary_tokens.saturating_add(self.converted_tokens)
    }
}

/// One user's pending settlement for one asset, snapshotted at enqueue time.
/// The snapshot is what gets decremented at reconciliation - never the
/// record's current value - so credits landing mid-run survive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimItem {
    pub wallet_address: String,
    pub amount: u64,
    pub user_id: Uuid,
}

/// Ordered batch of claims settled by one atomic transaction group.
/// The chain commits every transfer in the group or none of them.
#[derive(Debug, Clone)]
pub struct SettlementGroup {
    pub items: Vec<ClaimItem>,
}

impl SettlementGroup {
    pub fn total(&self) -> u64 {
        self.items.iter().map(|i| i.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Outcome of submitting one settlement group. A missing `tx_id` means the
/// whole group failed and no ledger state may change for it.
#[derive(Debug, Clone, Default)]
pub struct SettlementResult {
    pub tx_id: Option<String>,
    pub confirmed_round: Option<u64>,
    pub error: Option<String>,
}

impl SettlementResult {
    pub fn committed(&self) -> bool {
        self.tx_id.is_some()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            tx_id: None,
            confirmed_round: None,
            error: Some(error.into()),
        }
    }
}
