use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use super::{AssetHolding, RemoteLedger};
use crate::error::AppResult;

/// Which account query a cache entry answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Holdings,
}

/// Opt-in view of a single (wallet, asset) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptInStatus {
    pub opted_in: bool,
    pub balance: u64,
}

struct CacheEntry {
    holdings: Vec<AssetHolding>,
    fetched_at: Instant,
}

/// TTL cache over account holdings, keyed by (wallet, query kind).
/// A live entry short-circuits the network call entirely; holdings move
/// slowly enough that an hour of staleness is acceptable for opt-in checks.
pub struct HoldingsCache {
    chain: Arc<dyn RemoteLedger>,
    ttl: Duration,
    entries: RwLock<HashMap<(String, QueryKind), CacheEntry>>,
}

impl HoldingsCache {
    pub fn new(chain: Arc<dyn RemoteLedger>, ttl: Duration) -> Self {
        Self {
            chain,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(chain: Arc<dyn RemoteLedger>, config: &crate::config::Config) -> Self {
        Self::new(chain, Duration::from_secs(config.holdings_ttl_secs))
    }

    pub async fn account_holdings(&self, wallet: &str) -> AppResult<Vec<AssetHolding>> {
        let key = (wallet.to_string(), QueryKind::Holdings);

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!("Holdings cache hit for {}", wallet);
                    return Ok(entry.holdings.clone());
                }
            }
        }

        let holdings = self.chain.account_holdings(wallet).await?;

        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                holdings: holdings.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(holdings)
    }

    pub async fn opt_in_status(&self, wallet: &str, asset_id: u64) -> AppResult<OptInStatus> {
        let holdings = self.account_holdings(wallet).await?;
        let status = holdings
            .iter()
            .find(|h| h.asset_id == asset_id)
            .map(|h| OptInStatus {
                opted_in: true,
                balance: h.amount,
            })
            .unwrap_or(OptInStatus {
                opted_in: false,
                balance: 0,
            });
        Ok(status)
    }

    /// Drop the cached entry for a wallet after a confirmed transfer touched
    /// it, so the next read reflects the new on-chain balance.
    pub async fn invalidate(&self, wallet: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(&(wallet.to_string(), QueryKind::Holdings));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ConfirmationInfo, SuggestedParams, TransactionFilter, TransactionMatch};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingChain {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteLedger for CountingChain {
        async fn account_holdings(&self, _address: &str) -> AppResult<Vec<AssetHolding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![AssetHolding {
                asset_id: 7,
                amount: 500,
                is_frozen: false,
            }])
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

    #[tokio::test]
    async fn test_cache_hit_short_circuits_network() {
        let chain = Arc::new(CountingChain {
            calls: AtomicU32::new(0),
        });
        let cache = HoldingsCache::new(chain.clone(), Duration::from_secs(3600));

        let wallet = "A".repeat(58);
        cache.account_holdings(&wallet).await.unwrap();
        cache.account_holdings(&wallet).await.unwrap();
        cache.account_holdings(&wallet).await.unwrap();

        assert_eq!(chain.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let chain = Arc::new(CountingChain {
            calls: AtomicU32::new(0),
        });
        let cache = HoldingsCache::new(chain.clone(), Duration::from_secs(3600));

        let wallet = "B".repeat(58);
        cache.account_holdings(&wallet).await.unwrap();
        cache.invalidate(&wallet).await;
        cache.account_holdings(&wallet).await.unwrap();

        assert_eq!(chain.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_opt_in_status_derived_from_holdings() {
        let chain = Arc::new(CountingChain {
            calls: AtomicU32::new(0),
        });
        let cache = HoldingsCache::new(chain, Duration::from_secs(3600));
        let wallet = "C".repeat(58);

        let opted = cache.opt_in_status(&wallet, 7).await.unwrap();
        assert!(opted.opted_in);
        assert_eq!(opted.balance, 500);

        let not_opted = cache.opt_in_status(&wallet, 8).await.unwrap();
        assert!(!not_opted.opted_in);
        assert_eq!(not_opted.balance, 0);
    }
}
