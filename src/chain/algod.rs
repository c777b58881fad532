use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::retry::{with_retry, RetryPolicy};
use super::{
    validate_address, AssetHolding, ConfirmationInfo, RemoteLedger, SuggestedParams,
    TransactionFilter, TransactionMatch,
};
use crate::error::{AppResult, ChainError};

const API_TOKEN_HEADER: &str = "X-Algo-API-Token";

/// Public node providers allow around this many requests per second
const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

/// REST client for the node and its companion indexer.
///
/// Every outbound call passes the shared rate limiter before it hits the
/// network, and every call is wrapped in the bounded retry policy. Callers
/// never see a raw transport error, only the typed `ChainError` taxonomy.
pub struct AlgodClient {
    http: reqwest::Client,
    algod_url: String,
    indexer_url: String,
    api_token: String,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    assets: Vec<AssetHolding>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Deserialize)]
struct PendingInfo {
    #[serde(rename = "confirmed-round", default)]
    confirmed_round: Option<u64>,
    #[serde(rename = "pool-error", default)]
    pool_error: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    transactions: Vec<IndexedTransaction>,
}

#[derive(Deserialize)]
struct IndexedTransaction {
    id: String,
    #[serde(rename = "confirmed-round", default)]
    confirmed_round: u64,
    sender: String,
    #[serde(rename = "asset-transfer-transaction", default)]
    asset_transfer: Option<IndexedAssetTransfer>,
}

#[derive(Deserialize)]
struct IndexedAssetTransfer {
    receiver: String,
    amount: u64,
    #[serde(rename = "asset-id")]
    asset_id: u64,
}

impl AlgodClient {
    pub fn new(
        algod_url: String,
        indexer_url: String,
        api_token: String,
        retry: RetryPolicy,
        requests_per_second: u32,
    ) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN),
        );
        Self {
            http: reqwest::Client::new(),
            algod_url,
            indexer_url,
            api_token,
            retry,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.algod_url.clone(),
            config.indexer_url.clone(),
            config.algod_token.clone(),
            RetryPolicy::new(
                config.retry_max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            DEFAULT_REQUESTS_PER_SECOND,
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: &str) -> AppResult<T> {
        let value = with_retry(self.retry, operation, || {
            let url = url.to_string();
            async move {
                self.limiter.until_ready().await;
                let resp = self
                    .http
                    .get(&url)
                    .header(API_TOKEN_HEADER, &self.api_token)
                    .send()
                    .await?;
                Self::decode(resp).await
            }
        })
        .await?;
        Ok(value)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ChainError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);

        if status.is_client_error() {
            // The node will answer a malformed request the same way every
            // time; retrying only burns the budget.
            Err(ChainError::Rejected(format!("{}: {}", status, message)))
        } else {
            Err(ChainError::Transport(format!("{}: {}", status, message)))
        }
    }
}

#[async_trait]
impl RemoteLedger for AlgodClient {
    async fn account_holdings(&self, address: &str) -> AppResult<Vec<AssetHolding>> {
        validate_address(address)?;
        let url = format!("{}/v2/accounts/{}", self.algod_url, address);
        let account: AccountResponse = self.get_json("account_holdings", &url).await?;
        Ok(account.assets)
    }

    async fn suggested_params(&self) -> AppResult<SuggestedParams> {
        let url = format!("{}/v2/transactions/params", self.algod_url);
        self.get_json("suggested_params", &url).await
    }

    async fn submit(&self, signed: Vec<u8>) -> AppResult<String> {
        let url = format!("{}/v2/transactions", self.algod_url);
        let response = with_retry(self.retry, "submit", || {
            let url = url.clone();
            let body = signed.clone();
            async move {
                self.limiter.until_ready().await;
                let resp = self
                    .http
                    .post(&url)
                    .header(API_TOKEN_HEADER, &self.api_token)
                    .header(reqwest::header::CONTENT_TYPE, "application/x-binary")
                    .body(body)
                    .send()
                    .await?;
                Self::decode::<SubmitResponse>(resp).await
            }
        })
        .await?;

        debug!("Submitted transaction {}", response.tx_id);
        Ok(response.tx_id)
    }

    async fn wait_for_confirmation(
        &self,
        tx_id: &str,
        max_rounds: u64,
    ) -> AppResult<ConfirmationInfo> {
        let url = format!("{}/v2/transactions/pending/{}", self.algod_url, tx_id);

        for _ in 0..max_rounds {
            let info: PendingInfo = self.get_json("pending_info", &url).await?;

            if !info.pool_error.is_empty() {
                return Err(ChainError::Rejected(info.pool_error).into());
            }
            if let Some(round) = info.confirmed_round {
                if round > 0 {
                    return Ok(ConfirmationInfo {
                        tx_id: tx_id.to_string(),
                        confirmed_round: round,
                    });
                }
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(ChainError::ConfirmationTimeout {
            tx_id: tx_id.to_string(),
            waited_rounds: max_rounds,
        }
        .into())
    }

    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> AppResult<Vec<TransactionMatch>> {
        let mut url = format!("{}/v2/transactions?tx-type=axfer", self.indexer_url);
        if let Some(address) = &filter.address {
            validate_address(address)?;
            url.push_str(&format!("&address={}", address));
        }
        if let Some(asset_id) = filter.asset_id {
            url.push_str(&format!("&asset-id={}", asset_id));
        }
        if let Some(min_round) = filter.min_round {
            url.push_str(&format!("&min-round={}", min_round));
        }
        if let Some(max_round) = filter.max_round {
            url.push_str(&format!("&max-round={}", max_round));
        }
        if let Some(limit) = filter.limit {
            url.push_str(&format!("&limit={}", limit));
        }

        let response: SearchResponse = self.get_json("search_transactions", &url).await?;

        let matches = response
            .transactions
            .into_iter()
            .filter_map(|txn| {
                let transfer = txn.asset_transfer?;
                Some(TransactionMatch {
                    tx_id: txn.id,
                    round: txn.confirmed_round,
                    sender: txn.sender,
                    receiver: transfer.receiver,
                    asset_id: transfer.asset_id,
                    amount: transfer.amount,
                })
            })
            .collect();

        Ok(matches)
    }
}
