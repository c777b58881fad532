pub mod algod;
pub mod holdings;
pub mod retry;
pub mod txn;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ChainError};

/// One asset position held by an account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetHolding {
    #[serde(rename = "asset-id")]
    pub asset_id: u64,
    pub amount: u64,
    #[serde(rename = "is-frozen", default)]
    pub is_frozen: bool,
}

/// Suggested transaction parameters from the node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedParams {
    pub fee: u64,
    #[serde(rename = "min-fee")]
    pub min_fee: u64,
    #[serde(rename = "last-round")]
    pub last_round: u64,
    #[serde(rename = "genesis-id")]
    pub genesis_id: String,
    #[serde(rename = "genesis-hash")]
    pub genesis_hash: String,
}

impl SuggestedParams {
    /// Flat fee actually paid per transaction
    pub fn effective_fee(&self) -> u64 {
        self.fee.max(self.min_fee)
    }
}

/// Confirmation details for a committed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationInfo {
    pub tx_id: String,
    pub confirmed_round: u64,
}

/// Filter for historical transaction search
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionFilter {
    pub address: Option<String>,
    pub asset_id: Option<u64>,
    pub min_round: Option<u64>,
    pub max_round: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMatch {
    pub tx_id: String,
    pub round: u64,
    pub sender: String,
    pub receiver: String,
    pub asset_id: u64,
    pub amount: u64,
}

/// Narrow interface to the remote ledger. The engine treats the chain as an
/// opaque service; everything it needs goes through these five calls.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    async fn account_holdings(&self, address: &str) -> AppResult<Vec<AssetHolding>>;

    async fn suggested_params(&self) -> AppResult<SuggestedParams>;

    /// Submit one signed transaction or one signed transaction group.
    /// Returns the transaction id of the (first) submitted transaction.
    async fn submit(&self, signed: Vec<u8>) -> AppResult<String>;

    async fn wait_for_confirmation(
        &self,
        tx_id: &str,
        max_rounds: u64,
    ) -> AppResult<ConfirmationInfo>;

    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> AppResult<Vec<TransactionMatch>>;
}

const ADDRESS_LEN: usize = 58;

/// Reject malformed wallet addresses before any network call.
/// Addresses are 58-character RFC 4648 base32 (no padding).
pub fn validate_address(address: &str) -> Result<(), ChainError> {
    if address.len() != ADDRESS_LEN
        || !address
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
    {
        return Err(ChainError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        let good = "A".repeat(58);
        assert!(validate_address(&good).is_ok());

        assert!(validate_address("").is_err());
        assert!(validate_address(&"A".repeat(57)).is_err());
        assert!(validate_address(&"a".repeat(58)).is_err());
        // '0' and '1' are outside the base32 alphabet
        assert!(validate_address(&format!("0{}", "A".repeat(57))).is_err());
    }

    #[test]
    fn test_effective_fee_floors_at_min_fee() {
        let params = SuggestedParams {
            fee: 0,
            min_fee: 1000,
            last_round: 100,
            genesis_id: "mainnet-v1.0".to_string(),
            genesis_hash: "wGHE2Pwdvd7S12BL5FaOP20EGYesN73ktiC1qzkkit8=".to_string(),
        };
        assert_eq!(params.effective_fee(), 1000);
    }
}
