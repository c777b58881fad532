use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

/// Fire-and-forget operational notifications. The chat/UI layer implements
/// this; nothing here may fail the settlement run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn run_started(&self, asset_id: u64, pending_claims: usize);

    async fn run_finished(&self, asset_id: u64, settled_total: u64, groups_ok: usize, groups_failed: usize);

    async fn run_failed(&self, asset_id: u64, reason: &str);

    /// Ask the collaborator to re-sync a wallet's on-chain balances after a
    /// confirmed transfer touched it.
    async fn wallet_resync(&self, user_id: Uuid, wallet: &str, asset_id: u64);

    async fn low_balance(&self, wallet: &str, asset_id: u64, available: u64, required: u64);
}

/// Default notifier that writes everything to the log stream
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn run_started(&self, asset_id: u64, pending_claims: usize) {
        info!(
            "Settlement run started for asset {}: {} pending claims",
            asset_id, pending_claims
        );
    }

    async fn run_finished(&self, asset_id: u64, settled_total: u64, groups_ok: usize, groups_failed: usize) {
        info!(
            "Settlement run finished for asset {}: settled {} across {} groups ({} failed)",
            asset_id, settled_total, groups_ok, groups_failed
        );
    }

    async fn run_failed(&self, asset_id: u64, reason: &str) {
        warn!("Settlement run failed for asset {}: {}", asset_id, reason);
    }

    async fn wallet_resync(&self, user_id: Uuid, wallet: &str, asset_id: u64) {
        info!(
            "Wallet re-sync requested: user {} wallet {} asset {}",
            user_id, wallet, asset_id
        );
    }

    async fn low_balance(&self, wallet: &str, asset_id: u64, available: u64, required: u64) {
        warn!(
            "Low balance on settlement wallet {} for asset {}: available {}, required {}",
            wallet, asset_id, available, required
        );
    }
}
