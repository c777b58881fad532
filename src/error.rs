use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the engine
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the blockchain client adapter
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("Insufficient funds on {wallet}: required {required}, available {available}")]
    InsufficientFunds {
        wallet: String,
        required: u64,
        available: u64,
    },

    #[error("Node rejected request: {0}")]
    Rejected(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Confirmation timeout for {tx_id} after {waited_rounds} rounds")]
    ConfirmationTimeout { tx_id: String, waited_rounds: u64 },

    #[error("Remote unavailable: {operation} failed after {attempts} attempts")]
    RemoteUnavailable { operation: String, attempts: u32 },

    #[error("Transaction encoding failed: {0}")]
    Encode(String),
}

impl ChainError {
    /// Only transient failures are worth another attempt. Validation-class
    /// errors and node rejections come back identical on every retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// Errors from the reward ledger store
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Record not found for wallet {wallet}, asset {asset_id}")]
    RecordNotFound { wallet: String, asset_id: u64 },

    #[error("Underflow on wallet {wallet}, asset {asset_id}: temporary balance {current} cannot absorb delta {delta}")]
    Underflow {
        wallet: String,
        asset_id: u64,
        current: u64,
        delta: i64,
    },
}

/// Errors from the settlement trigger surface
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("User {user_id} has no wallet opted into asset {asset_id}")]
    NoOptedInWallet { user_id: Uuid, asset_id: u64 },

    #[error("Nothing to claim for user {user_id} on asset {asset_id}")]
    NothingToClaim { user_id: Uuid, asset_id: u64 },
}

impl From<reqwest::Error> for ChainError {
    fn from(error: reqwest::Error) -> Self {
        ChainError::Transport(format!("HTTP request error: {}", error))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

/// Result type alias for the engine
pub type AppResult<T> = Result<T, AppError>;
