use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::chain::holdings::HoldingsCache;
use crate::error::AppResult;
use crate::ledger::RewardLedger;

/// Which side of a transfer a wallet is being picked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletRole {
    Sender,
    Receiver,
}

/// A wallet resolved by the selection policy, with its live on-chain balance
#[derive(Debug, Clone)]
pub struct SelectedWallet {
    pub address: String,
    pub on_chain_balance: u64,
}

/// Deterministic wallet selection for one (user, asset) pair.
///
/// Only wallets opted into the asset qualify. Receivers are ranked by
/// combined converted + temporary balance, senders by live on-chain balance.
/// Ties keep the first wallet in stable record order. No opted-in wallet
/// means `None`: the caller surfaces "opt-in required" instead of failing
/// the run.
pub struct WalletPolicy {
    ledger: Arc<dyn RewardLedger>,
    holdings: Arc<HoldingsCache>,
}

impl WalletPolicy {
    pub fn new(ledger: Arc<dyn RewardLedger>, holdings: Arc<HoldingsCache>) -> Self {
        Self { ledger, holdings }
    }

    pub async fn select_wallet(
        &self,
        user_id: Uuid,
        asset_id: u64,
        role: WalletRole,
    ) -> AppResult<Option<SelectedWallet>> {
        let records = self.ledger.records_for_user(user_id, asset_id).await?;

        let mut best: Option<(SelectedWallet, u64)> = None;
        for record in &records {
            let status = self
                .holdings
                .opt_in_status(&record.wallet_address, asset_id)
                .await?;
            if !status.opted_in {
                continue;
            }

            let rank = match role {
                WalletRole::Receiver => record.combined_balance(),
                WalletRole::Sender => status.balance,
            };

            // Strictly-greater keeps the first wallet on ties
            if best.as_ref().map_or(true, |(_, top)| rank > *top) {
                best = Some((
                    SelectedWallet {
                        address: record.wallet_address.clone(),
                        on_chain_balance: status.balance,
                    },
                    rank,
                ));
            }
        }

        if best.is_none() {
            debug!(
                "No wallet opted into asset {} for user {} ({:?} role)",
                asset_id, user_id, role
            );
        }

        Ok(best.map(|(wallet, _)| wallet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        AssetHolding, ConfirmationInfo, RemoteLedger, SuggestedParams, TransactionFilter,
        TransactionMatch,
    };
    use crate::ledger::MemoryRewardLedger;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FixedChain {
        holdings: HashMap<String, Vec<AssetHolding>>,
    }

    #[async_trait]
    impl RemoteLedger for FixedChain {
        async fn account_holdings(&self, address: &str) -> AppResult<Vec<AssetHolding>> {
            Ok(self.holdings.get(address).cloned().unwrap_or_default())
        }

        async fn suggested_params(&self) -> AppResult<SuggestedParams> {
            unimplemented!()
        }

        async fn submit(&self, _signed: Vec<u8>) -> AppResult<String> {
            unimplemented!()
        }

        async fn wait_for_confirmation(
            &self,
            _tx_id: &str,
            _max_rounds: u64,
        ) -> AppResult<ConfirmationInfo> {
            unimplemented!()
        }

        async fn search_transactions(
            &self,
            _filter: &TransactionFilter,
        ) -> AppResult<Vec<TransactionMatch>> {
            unimplemented!()
        }
    }

    fn holding(asset_id: u64, amount: u64) -> AssetHolding {
        AssetHolding {
            asset_id,
            amount,
            is_frozen: false,
        }
    }

    #[tokio::test]
    async fn test_receiver_picks_highest_combined_balance() {
        let ledger = Arc::new(MemoryRewardLedger::new());
        let user = Uuid::new_v4();
        let wallet_a = "A".repeat(58);
        let wallet_b = "B".repeat(58);

        ledger.ensure_record(user, &wallet_a, 5).await.unwrap();
        ledger.ensure_record(user, &wallet_b, 5).await.unwrap();
        ledger.increment_temporary(user, &wallet_a, 5, 10).await.unwrap();
        ledger.increment_temporary(user, &wallet_b, 5, 300).await.unwrap();

        let mut holdings = HashMap::new();
        holdings.insert(wallet_a.clone(), vec![holding(5, 1)]);
        holdings.insert(wallet_b.clone(), vec![holding(5, 1)]);
        let cache = Arc::new(HoldingsCache::new(
            Arc::new(FixedChain { holdings }),
            Duration::from_secs(3600),
        ));

        let policy = WalletPolicy::new(ledger, cache);
        let selected = policy
            .select_wallet(user, 5, WalletRole::Receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.address, wallet_b);
    }

    #[tokio::test]
    async fn test_not_opted_in_wallets_are_excluded() {
        let ledger = Arc::new(MemoryRewardLedger::new());
        let user = Uuid::new_v4();
        let wallet_a = "A".repeat(58);
        let wallet_b = "B".repeat(58);

        ledger.ensure_record(user, &wallet_a, 5).await.unwrap();
        ledger.ensure_record(user, &wallet_b, 5).await.unwrap();
        ledger.increment_temporary(user, &wallet_a, 5, 999).await.unwrap();

        // Only wallet B is opted in, despite wallet A's larger balance
        let mut holdings = HashMap::new();
        holdings.insert(wallet_b.clone(), vec![holding(5, 40)]);
        let cache = Arc::new(HoldingsCache::new(
            Arc::new(FixedChain { holdings }),
            Duration::from_secs(3600),
        ));

        let policy = WalletPolicy::new(ledger, cache);
        let selected = policy
            .select_wallet(user, 5, WalletRole::Receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.address, wallet_b);
        assert_eq!(selected.on_chain_balance, 40);
    }

    #[tokio::test]
    async fn test_no_opted_in_wallet_returns_none() {
        let ledger = Arc::new(MemoryRewardLedger::new());
        let user = Uuid::new_v4();
        let wallet = "A".repeat(58);
        ledger.ensure_record(user, &wallet, 5).await.unwrap();

        let cache = Arc::new(HoldingsCache::new(
            Arc::new(FixedChain {
                holdings: HashMap::new(),
            }),
            Duration::from_secs(3600),
        ));

        let policy = WalletPolicy::new(ledger, cache);
        let selected = policy
            .select_wallet(user, 5, WalletRole::Receiver)
            .await
            .unwrap();
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn test_tie_break_keeps_first_wallet() {
        let ledger = Arc::new(MemoryRewardLedger::new());
        let user = Uuid::new_v4();
        let wallet_a = "A".repeat(58);
        let wallet_b = "B".repeat(58);

        ledger.ensure_record(user, &wallet_a, 5).await.unwrap();
        ledger.ensure_record(user, &wallet_b, 5).await.unwrap();
        ledger.increment_temporary(user, &wallet_a, 5, 100).await.unwrap();
        ledger.increment_temporary(user, &wallet_b, 5, 100).await.unwrap();

        let mut holdings = HashMap::new();
        holdings.insert(wallet_a.clone(), vec![holding(5, 0)]);
        holdings.insert(wallet_b.clone(), vec![holding(5, 0)]);
        let cache = Arc::new(HoldingsCache::new(
            Arc::new(FixedChain { holdings }),
            Duration::from_secs(3600),
        ));

        let policy = WalletPolicy::new(ledger, cache);
        let selected = policy
            .select_wallet(user, 5, WalletRole::Receiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.address, wallet_a);
    }
}
