use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::RewardRecord;
use super::repository::RewardLedger;
use crate::error::{AppResult, LedgerError};

/// In-memory reward ledger with the same atomicity guarantees as the
/// Postgres implementation. Used by tests and single-process deployments.
pub struct MemoryRewardLedger {
    // Keyed by (wallet, asset) - the unique pair; insertion order is kept
    // separately so threshold queries return a stable order.
    records: RwLock<HashMap<(String, u64), RewardRecord>>,
    order: RwLock<Vec<(String, u64)>>,
}

impl MemoryRewardLedger {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryRewardLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardLedger for MemoryRewardLedger {
    async fn find_record(
        &self,
        user_id: Uuid,
        wallet: &str,
        asset_id: u64,
    ) -> AppResult<Option<RewardRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(wallet.to_string(), asset_id))
            .filter(|r| r.user_id == user_id)
            .cloned())
    }

    async fn records_for_user(&self, user_id: Uuid, asset_id: u64) -> AppResult<Vec<RewardRecord>> {
        let records = self.records.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|key| records.get(key))
            .filter(|r| r.user_id == user_id && r.asset_id == asset_id)
            .cloned()
            .collect())
    }

    async fn ensure_record(&self, user_id: Uuid, wallet: &str, asset_id: u64) -> AppResult<()> {
        let key = (wallet.to_string(), asset_id);
        let mut records = self.records.write().await;
        if !records.contains_key(&key) {
            records.insert(
                key.clone(),
                RewardRecord {
                    user_id,
                    wallet_address: wallet.to_string(),
                    asset_id,
                    temporary_tokens: 0,
                    converted_tokens: 0,
                    updated_at: Utc::now(),
                },
            );
            self.order.write().await.push(key);
        }
        Ok(())
    }

    async fn increment_temporary(
        &self,
        _user_id: Uuid,
        wallet: &str,
        asset_id: u64,
        delta: i64,
    ) -> AppResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&(wallet.to_string(), asset_id))
            .ok_or(LedgerError::RecordNotFound {
                wallet: wallet.to_string(),
                asset_id,
            })?;

        let next = record.temporary_tokens as i128 + delta as i128;
        if next < 0 {
            return Err(LedgerError::Underflow {
                wallet: wallet.to_string(),
                asset_id,
                current: record.temporary_tokens,
                delta,
            }
            .into());
        }

        record.temporary_tokens = next as u64;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_converted(&self, wallet: &str, asset_id: u64, converted: u64) -> AppResult<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&(wallet.to_string(), asset_id)) {
            record.converted_tokens = converted;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_above_threshold(
        &self,
        asset_id: u64,
        threshold: u64,
        user_id: Option<Uuid>,
    ) -> AppResult<Vec<RewardRecord>> {
        let records = self.records.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|key| records.get(key))
            .filter(|r| r.asset_id == asset_id && r.temporary_tokens > threshold)
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn test_over_decrement_fails_loudly() {
        let ledger = MemoryRewardLedger::new();
        let user = Uuid::new_v4();
        let wallet = "A".repeat(58);

        ledger.ensure_record(user, &wallet, 1).await.unwrap();
        ledger.increment_temporary(user, &wallet, 1, 50).await.unwrap();

        let err = ledger
            .increment_temporary(user, &wallet, 1, -51)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Ledger(LedgerError::Underflow {
                current: 50,
                delta: -51,
                ..
            })
        ));

        // The failed decrement must not have moved the balance
        let record = ledger.find_record(user, &wallet, 1).await.unwrap().unwrap();
        assert_eq!(record.temporary_tokens, 50);
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let ledger = MemoryRewardLedger::new();
        let user = Uuid::new_v4();

        for (i, amount) in [0i64, 10, 11, 200].iter().enumerate() {
            let wallet = char::from(b'B' + i as u8).to_string().repeat(58);
            ledger.ensure_record(user, &wallet, 9).await.unwrap();
            if *amount > 0 {
                ledger
                    .increment_temporary(user, &wallet, 9, *amount)
                    .await
                    .unwrap();
            }
        }

        let above = ledger.find_above_threshold(9, 10, None).await.unwrap();
        assert_eq!(above.len(), 2);
        assert!(above.iter().all(|r| r.temporary_tokens > 10));
    }

    #[tokio::test]
    async fn test_set_converted_refreshes_on_chain_mirror() {
        let ledger = MemoryRewardLedger::new();
        let user = Uuid::new_v4();
        let wallet = "D".repeat(58);

        ledger.ensure_record(user, &wallet, 4).await.unwrap();
        ledger.increment_temporary(user, &wallet, 4, 30).await.unwrap();
        ledger.set_converted(&wallet, 4, 70).await.unwrap();

        let record = ledger.find_record(user, &wallet, 4).await.unwrap().unwrap();
        assert_eq!(record.converted_tokens, 70);
        assert_eq!(record.combined_balance(), 100);
    }

    #[tokio::test]
    async fn test_ensure_record_is_idempotent() {
        let ledger = MemoryRewardLedger::new();
        let user = Uuid::new_v4();
        let wallet = "C".repeat(58);

        ledger.ensure_record(user, &wallet, 3).await.unwrap();
        ledger.increment_temporary(user, &wallet, 3, 25).await.unwrap();
        ledger.ensure_record(user, &wallet, 3).await.unwrap();

        let record = ledger.find_record(user, &wallet, 3).await.unwrap().unwrap();
        assert_eq!(record.temporary_tokens, 25);
    }
}
