use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, instrument, warn};

use super::lease::{Cache, RunLease};
use crate::chain::holdings::HoldingsCache;
use crate::config::Config;
use crate::chain::txn::{assign_group_id, AssetTransfer, SigningAuthority, MAX_GROUP_SIZE};
use crate::chain::RemoteLedger;
use crate::error::{AppResult, ChainError};
use crate::ledger::{ClaimItem, RewardLedger, SettlementGroup, SettlementResult};
use crate::notify::Notifier;
use crate::wallet::{WalletPolicy, WalletRole};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL of the per-asset run lock; bounds staleness after a crash
    pub lock_ttl: Duration,
    /// Rounds to wait for confirmation before a group counts as failed
    pub confirmation_wait_rounds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            confirmation_wait_rounds: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            confirmation_wait_rounds: config.confirmation_wait_rounds,
        }
    }
}

/// Summary of one settlement run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// True when another run already held the asset's lock
    pub skipped: bool,
    pub claims: usize,
    pub groups: usize,
    pub groups_failed: usize,
    pub settled_total: u64,
}

impl RunReport {
    fn skipped_run() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// The settlement engine: turns pending reward records into atomic on-chain
/// transfer groups and reconciles the ledger afterwards.
///
/// Collaborators are passed in explicitly; the engine owns no globals.
pub struct SettlementEngine {
    chain: Arc<dyn RemoteLedger>,
    holdings: Arc<HoldingsCache>,
    ledger: Arc<dyn RewardLedger>,
    policy: WalletPolicy,
    lease: RunLease,
    notifier: Arc<dyn Notifier>,
    authority: SigningAuthority,
    config: EngineConfig,
}

struct GroupOutcome {
    committed: bool,
    settled: u64,
}

impl SettlementEngine {
    pub fn new(
        chain: Arc<dyn RemoteLedger>,
        holdings: Arc<HoldingsCache>,
        ledger: Arc<dyn RewardLedger>,
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn Notifier>,
        authority: SigningAuthority,
        config: EngineConfig,
    ) -> Self {
        let policy = WalletPolicy::new(ledger.clone(), holdings.clone());
        let lease = RunLease::new(cache, config.lock_ttl);
        Self {
            chain,
            holdings,
            ledger,
            policy,
            lease,
            notifier,
            authority,
            config,
        }
    }

    pub fn authority_address(&self) -> &str {
        self.authority.address()
    }

    /// Settle every record for `asset_id` with `temporary_tokens` above
    /// `threshold`. At most one run per asset executes at a time: a second
    /// trigger observes the lock and returns a skipped report without
    /// submitting anything.
    #[instrument(skip(self))]
    pub async fn settle_asset(&self, asset_id: u64, threshold: u64) -> AppResult<RunReport> {
        let Some(lease) = self.lease.acquire(asset_id).await? else {
            info!("Settlement skipped for asset {}: already running", asset_id);
            return Ok(RunReport::skipped_run());
        };

        let outcome = self.run_locked(asset_id, threshold).await;
        if let Err(err) = &outcome {
            self.notifier.run_failed(asset_id, &err.to_string()).await;
        }
        self.lease.release(lease).await?;
        outcome
    }

    async fn run_locked(&self, asset_id: u64, threshold: u64) -> AppResult<RunReport> {
        let claims = self.enqueue(asset_id, threshold).await?;
        self.notifier.run_started(asset_id, claims.len()).await;

        if claims.is_empty() {
            info!("No claims above threshold {} for asset {}", threshold, asset_id);
            return Ok(RunReport::default());
        }

        // Sufficiency is checked against the live node balance, never the
        // holdings cache.
        let payout: u64 = claims.iter().map(|c| c.amount).sum();
        let available = self.live_asset_balance(self.authority.address(), asset_id).await?;
        if available < payout {
            self.notifier
                .low_balance(self.authority.address(), asset_id, available, payout)
                .await;
            return Err(ChainError::InsufficientFunds {
                wallet: self.authority.address().to_string(),
                required: payout,
                available,
            }
            .into());
        }

        let mut report = RunReport {
            claims: claims.len(),
            ..RunReport::default()
        };

        if claims.len() == 1 {
            // A single claim costs the same as a direct transfer; skip the
            // group-id machinery and count it as one submission.
            let item = &claims[0];
            report.groups = 1;
            let result = self
                .claim_token(&item.wallet_address, item.amount, asset_id)
                .await?;
            if result.committed() {
                self.reconcile_item(item, asset_id).await;
                report.settled_total = item.amount;
            } else {
                warn!(
                    "unsettled claim: {} -- {} -- {}",
                    item.wallet_address, item.amount, item.user_id
                );
                report.groups_failed = 1;
            }
        } else {
            let groups = chunk_claims(claims);
            report.groups = groups.len();

            // Groups are independently atomic; submit them concurrently,
            // bounded only by the adapter's rate limiter. Each future is
            // strictly sequential within its own group.
            let outcomes = join_all(
                groups
                    .into_iter()
                    .enumerate()
                    .map(|(index, group)| self.settle_group(asset_id, index, group)),
            )
            .await;

            for outcome in outcomes {
                if outcome.committed {
                    report.settled_total += outcome.settled;
                } else {
                    report.groups_failed += 1;
                }
            }
        }

        self.notifier
            .run_finished(
                asset_id,
                report.settled_total,
                report.groups - report.groups_failed,
                report.groups_failed,
            )
            .await;
        Ok(report)
    }

    /// Build the pending-claims list: one claim per user, received on the
    /// user's best opted-in wallet, amount snapshotted now. Users with no
    /// opted-in wallet are skipped and logged, not retried.
    async fn enqueue(&self, asset_id: u64, threshold: u64) -> AppResult<Vec<ClaimItem>> {
        let records = self
            .ledger
            .find_above_threshold(asset_id, threshold, None)
            .await?;

        let mut seen_users = HashSet::new();
        let mut claims = Vec::new();

        for record in records {
            if !seen_users.insert(record.user_id) {
                continue;
            }

            let Some(wallet) = self
                .policy
                .select_wallet(record.user_id, asset_id, WalletRole::Receiver)
                .await?
            else {
                info!(
                    "Skipping user {}: no wallet opted into asset {}",
                    record.user_id, asset_id
                );
                continue;
            };

            // Snapshot the selected wallet's own record so reconciliation
            // decrements exactly what was enqueued.
            let snapshot = self
                .ledger
                .find_record(record.user_id, &wallet.address, asset_id)
                .await?
                .map(|r| r.temporary_tokens)
                .unwrap_or(0);
            if snapshot == 0 {
                continue;
            }

            claims.push(ClaimItem {
                wallet_address: wallet.address,
                amount: snapshot,
                user_id: record.user_id,
            });
        }

        Ok(claims)
    }

    async fn settle_group(&self, asset_id: u64, index: usize, group: SettlementGroup) -> GroupOutcome {
        match self.submit_group(asset_id, &group).await {
            Ok(result) => {
                let round = result.confirmed_round.unwrap_or_default();
                info!(
                    "Group {} committed for asset {}: {} items, total {} (round {})",
                    index,
                    asset_id,
                    group.len(),
                    group.total(),
                    round
                );
                for item in &group.items {
                    self.reconcile_item(item, asset_id).await;
                }
                GroupOutcome {
                    committed: true,
                    settled: group.total(),
                }
            }
            Err(err) => {
                // All-or-nothing: nothing was decremented, so there is no
                // rollback. Log each item for the next scheduled run.
                error!("Group {} failed for asset {}: {}", index, asset_id, err);
                for item in &group.items {
                    warn!(
                        "unsettled claim: {} -- {} -- {}",
                        item.wallet_address, item.amount, item.user_id
                    );
                }
                GroupOutcome {
                    committed: false,
                    settled: 0,
                }
            }
        }
    }

    /// Build, group, sign, submit and await one atomic transfer group.
    async fn submit_group(
        &self,
        asset_id: u64,
        group: &SettlementGroup,
    ) -> AppResult<SettlementResult> {
        debug_assert!(!group.is_empty() && group.len() <= MAX_GROUP_SIZE);

        let params = self.chain.suggested_params().await?;
        let mut txns = Vec::with_capacity(group.len());
        for item in &group.items {
            txns.push(AssetTransfer::new(
                &params,
                self.authority.address(),
                &item.wallet_address,
                asset_id,
                item.amount,
            )?);
        }
        assign_group_id(&mut txns)?;
        let blob = self.authority.sign_all(&txns)?;

        let tx_id = self.chain.submit(blob).await?;
        let confirmation = self
            .chain
            .wait_for_confirmation(&tx_id, self.config.confirmation_wait_rounds)
            .await?;

        Ok(SettlementResult {
            tx_id: Some(confirmation.tx_id),
            confirmed_round: Some(confirmation.confirmed_round),
            error: None,
        })
    }

    /// Single one-to-one transfer from the settlement authority. Used by the
    /// N=1 fast path and by user-initiated claims.
    pub async fn claim_token(
        &self,
        wallet: &str,
        amount: u64,
        asset_id: u64,
    ) -> AppResult<SettlementResult> {
        let params = self.chain.suggested_params().await?;
        let txn = AssetTransfer::new(&params, self.authority.address(), wallet, asset_id, amount)?;
        let blob = self.authority.sign_all(&[txn])?;

        let tx_id = match self.chain.submit(blob).await {
            Ok(tx_id) => tx_id,
            Err(err) => return Ok(SettlementResult::failed(err.to_string())),
        };
        match self
            .chain
            .wait_for_confirmation(&tx_id, self.config.confirmation_wait_rounds)
            .await
        {
            Ok(confirmation) => Ok(SettlementResult {
                tx_id: Some(confirmation.tx_id),
                confirmed_round: Some(confirmation.confirmed_round),
                error: None,
            }),
            Err(err) => Ok(SettlementResult::failed(err.to_string())),
        }
    }

    /// Immediate transfer between two wallets, executed by the authority in
    /// revocation mode so the source wallet never co-signs.
    pub async fn transfer_between(
        &self,
        from_wallet: &str,
        to_wallet: &str,
        asset_id: u64,
        amount: u64,
    ) -> AppResult<SettlementResult> {
        let available = self.live_asset_balance(from_wallet, asset_id).await?;
        if available < amount {
            return Err(ChainError::InsufficientFunds {
                wallet: from_wallet.to_string(),
                required: amount,
                available,
            }
            .into());
        }

        let params = self.chain.suggested_params().await?;
        let txn =
            AssetTransfer::new(&params, self.authority.address(), to_wallet, asset_id, amount)?
                .with_clawback(from_wallet)?;
        let blob = self.authority.sign_all(&[txn])?;

        let tx_id = self.chain.submit(blob).await?;
        let confirmation = self
            .chain
            .wait_for_confirmation(&tx_id, self.config.confirmation_wait_rounds)
            .await?;

        self.holdings.invalidate(from_wallet).await;
        self.holdings.invalidate(to_wallet).await;

        Ok(SettlementResult {
            tx_id: Some(confirmation.tx_id),
            confirmed_round: Some(confirmation.confirmed_round),
            error: None,
        })
    }

    /// Decrement a confirmed claim by its snapshotted amount - never the
    /// record's current value, so credits that landed mid-run survive - and
    /// kick off the wallet re-sync.
    pub(crate) async fn reconcile_item(&self, item: &ClaimItem, asset_id: u64) {
        if let Err(err) = self
            .ledger
            .increment_temporary(
                item.user_id,
                &item.wallet_address,
                asset_id,
                -(item.amount as i64),
            )
            .await
        {
            // The group already committed on-chain; a failed decrement here
            // is a logic error that needs operator attention.
            error!(
                "Reconcile failed for {} -- {} -- {}: {}",
                item.wallet_address, item.amount, item.user_id, err
            );
            return;
        }

        self.holdings.invalidate(&item.wallet_address).await;
        self.notifier
            .wallet_resync(item.user_id, &item.wallet_address, asset_id)
            .await;
    }

    /// Live on-chain balance, bypassing the holdings cache
    pub async fn live_asset_balance(&self, wallet: &str, asset_id: u64) -> AppResult<u64> {
        let holdings = self.chain.account_holdings(wallet).await?;
        Ok(holdings
            .iter()
            .find(|h| h.asset_id == asset_id)
            .map(|h| h.amount)
            .unwrap_or(0))
    }

    pub(crate) fn ledger(&self) -> &Arc<dyn RewardLedger> {
        &self.ledger
    }

    pub(crate) fn holdings(&self) -> &Arc<HoldingsCache> {
        &self.holdings
    }

    pub(crate) fn policy(&self) -> &WalletPolicy {
        &self.policy
    }
}

/// Split pending claims into ordered groups of at most `MAX_GROUP_SIZE`
pub fn chunk_claims(claims: Vec<ClaimItem>) -> Vec<SettlementGroup> {
    claims
        .chunks(MAX_GROUP_SIZE)
        .map(|chunk| SettlementGroup {
            items: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claim(n: u64) -> ClaimItem {
        ClaimItem {
            wallet_address: "A".repeat(58),
            amount: n,
            user_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_chunking_is_ceil_of_sixteenths() {
        assert_eq!(chunk_claims(vec![]).len(), 0);
        assert_eq!(chunk_claims((1..=1).map(claim).collect()).len(), 1);
        assert_eq!(chunk_claims((1..=16).map(claim).collect()).len(), 1);
        assert_eq!(chunk_claims((1..=17).map(claim).collect()).len(), 2);
        assert_eq!(chunk_claims((1..=32).map(claim).collect()).len(), 2);
        assert_eq!(chunk_claims((1..=33).map(claim).collect()).len(), 3);
    }

    #[test]
    fn test_chunking_preserves_order_and_sizes() {
        let claims: Vec<ClaimItem> = (1..=40).map(claim).collect();
        let groups = chunk_claims(claims);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 16);
        assert_eq!(groups[1].len(), 16);
        assert_eq!(groups[2].len(), 8);

        let flattened: Vec<u64> = groups
            .iter()
            .flat_map(|g| g.items.iter().map(|i| i.amount))
            .collect();
        let expected: Vec<u64> = (1..=40).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_engine_config_maps_env_settings() {
        let config = Config {
            database_url: "postgresql://localhost/rewards".to_string(),
            algod_url: "http://localhost:4001".to_string(),
            algod_token: String::new(),
            indexer_url: "http://localhost:8980".to_string(),
            lock_ttl_secs: 120,
            holdings_ttl_secs: 60,
            retry_max_attempts: 3,
            retry_base_delay_ms: 10,
            confirmation_wait_rounds: 4,
        };

        let engine_config = EngineConfig::from_config(&config);
        assert_eq!(engine_config.lock_ttl, Duration::from_secs(120));
        assert_eq!(engine_config.confirmation_wait_rounds, 4);
    }

    #[test]
    fn test_group_totals() {
        let groups = chunk_claims(vec![claim(100), claim(100), claim(100)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].total(), 300);
    }
}
