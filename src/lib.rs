//! Reward settlement engine: reconciles an off-chain reward ledger against
//! on-chain asset transfers, batching claims into atomic transaction groups
//! and guaranteeing single-flight settlement runs per asset.

pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod settlement;
pub mod wallet;

pub use config::Config;
pub use error::{AppError, AppResult, ChainError, LedgerError, SettlementError};
