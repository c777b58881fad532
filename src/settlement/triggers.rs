use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::engine::{RunReport, SettlementEngine};
use crate::error::{AppResult, SettlementError};
use crate::ledger::{ClaimItem, SettlementResult};
use crate::wallet::WalletRole;

/// Outcome of a user-initiated claim across their wallets
#[derive(Debug, Clone, Default)]
pub struct ClaimOutcome {
    pub wallets_paid: usize,
    pub wallets_failed: usize,
    pub claimed_total: u64,
}

/// The settlement trigger surface: the entry points a command handler, a
/// scheduler, or an admin tool calls. All of them converge on the engine.
pub struct RewardService {
    engine: Arc<SettlementEngine>,
}

impl RewardService {
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        Self { engine }
    }

    /// User-initiated claim: pay out every wallet of this user holding an
    /// unclaimed balance, one direct transfer per wallet. The ledger is
    /// decremented per wallet only after that wallet's transfer confirms, so
    /// a failed wallet keeps its balance for the next run.
    pub async fn claim_for_user(&self, user_id: Uuid, asset_id: u64) -> AppResult<ClaimOutcome> {
        let records = self
            .engine
            .ledger()
            .find_above_threshold(asset_id, 0, Some(user_id))
            .await?;
        if records.is_empty() {
            return Err(SettlementError::NothingToClaim { user_id, asset_id }.into());
        }

        if self
            .engine
            .policy()
            .select_wallet(user_id, asset_id, WalletRole::Receiver)
            .await?
            .is_none()
        {
            return Err(SettlementError::NoOptedInWallet { user_id, asset_id }.into());
        }

        let mut outcome = ClaimOutcome::default();
        for record in records {
            let status = self
                .engine
                .holdings()
                .opt_in_status(&record.wallet_address, asset_id)
                .await?;
            if !status.opted_in {
                // Pay only wallets that can actually receive the asset; the
                // rest keep accruing until they opt in.
                info!(
                    "Skipping wallet {} for user {}: not opted into asset {}",
                    record.wallet_address, user_id, asset_id
                );
                continue;
            }

            let item = ClaimItem {
                wallet_address: record.wallet_address.clone(),
                amount: record.temporary_tokens,
                user_id,
            };
            let result = self
                .engine
                .claim_token(&item.wallet_address, item.amount, asset_id)
                .await?;

            if result.committed() {
                self.engine.reconcile_item(&item, asset_id).await;
                outcome.wallets_paid += 1;
                outcome.claimed_total += item.amount;
            } else {
                warn!(
                    "Claim failed for {} -- {} -- {}: {}",
                    item.wallet_address,
                    item.amount,
                    item.user_id,
                    result.error.as_deref().unwrap_or("unknown")
                );
                outcome.wallets_failed += 1;
            }
        }

        Ok(outcome)
    }

    /// Scheduled bulk claim: settle every user above the threshold. Driven
    /// by an external scheduler or an admin force-replenish; the per-asset
    /// run lock makes racing triggers harmless.
    pub async fn settle_asset(&self, asset_id: u64, threshold: u64) -> AppResult<RunReport> {
        self.engine.settle_asset(asset_id, threshold).await
    }

    /// Peer-to-peer transfer between two users' resolved wallets. The tokens
    /// are moved by the managing authority in revocation mode, so the sender
    /// never has to co-sign.
    pub async fn transfer(
        &self,
        from_user: Uuid,
        to_user: Uuid,
        asset_id: u64,
        amount: u64,
    ) -> AppResult<SettlementResult> {
        let sender = self
            .engine
            .policy()
            .select_wallet(from_user, asset_id, WalletRole::Sender)
            .await?
            .ok_or(SettlementError::NoOptedInWallet {
                user_id: from_user,
                asset_id,
            })?;
        let receiver = self
            .engine
            .policy()
            .select_wallet(to_user, asset_id, WalletRole::Receiver)
            .await?
            .ok_or(SettlementError::NoOptedInWallet {
                user_id: to_user,
                asset_id,
            })?;

        self.engine
            .transfer_between(&sender.address, &receiver.address, asset_id, amount)
            .await
    }

    /// Collect payment for an in-economy purchase: claw the price back from
    /// the payer's wallet into the settlement authority's account.
    pub async fn purchase(
        &self,
        payer: Uuid,
        asset_id: u64,
        amount: u64,
    ) -> AppResult<SettlementResult> {
        let wallet = self
            .engine
            .policy()
            .select_wallet(payer, asset_id, WalletRole::Sender)
            .await?
            .ok_or(SettlementError::NoOptedInWallet {
                user_id: payer,
                asset_id,
            })?;

        let treasury = self.engine.authority_address().to_string();
        self.engine
            .transfer_between(&wallet.address, &treasury, asset_id, amount)
            .await
    }
}
