use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::prelude::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::RewardRecord;
use crate::error::{AppError, AppResult, LedgerError};

/// Persisted per-(user, wallet, asset) reward ledger.
///
/// `increment_temporary` is the only way `temporary_tokens` moves, and it is
/// atomic: a delta that would drive the balance below zero fails loudly with
/// `LedgerError::Underflow` instead of clamping.
#[async_trait]
pub trait RewardLedger: Send + Sync {
    async fn find_record(
        &self,
        user_id: Uuid,
        wallet: &str,
        asset_id: u64,
    ) -> AppResult<Option<RewardRecord>>;

    async fn records_for_user(&self, user_id: Uuid, asset_id: u64) -> AppResult<Vec<RewardRecord>>;

    /// Create the record on first wallet/asset opt-in sync; no-op if present.
    async fn ensure_record(&self, user_id: Uuid, wallet: &str, asset_id: u64) -> AppResult<()>;

    /// Atomically add `delta` (may be negative) to `temporary_tokens`.
    async fn increment_temporary(
        &self,
        user_id: Uuid,
        wallet: &str,
        asset_id: u64,
        delta: i64,
    ) -> AppResult<()>;

    /// Refresh the informational on-chain balance after a re-sync.
    async fn set_converted(&self, wallet: &str, asset_id: u64, converted: u64) -> AppResult<()>;

    /// Records with `temporary_tokens` strictly above `threshold`,
    /// optionally narrowed to one user. Stable order by creation.
    async fn find_above_threshold(
        &self,
        asset_id: u64,
        threshold: u64,
        user_id: Option<Uuid>,
    ) -> AppResult<Vec<RewardRecord>>;
}

#[derive(FromRow)]
struct RewardRecordRow {
    user_id: Uuid,
    wallet_address: String,
    asset_id: i64,
    temporary_tokens: i64,
    converted_tokens: i64,
    updated_at: DateTime<Utc>,
}

impl RewardRecordRow {
    fn into_record(self) -> AppResult<RewardRecord> {
        Ok(RewardRecord {
            user_id: self.user_id,
            wallet_address: self.wallet_address,
            asset_id: to_u64(self.asset_id)?,
            temporary_tokens: to_u64(self.temporary_tokens)?,
            converted_tokens: to_u64(self.converted_tokens)?,
            updated_at: self.updated_at,
        })
    }
}

fn to_u64(value: i64) -> AppResult<u64> {
    u64::try_from(value).map_err(|_| AppError::Internal(format!("negative ledger value {}", value)))
}

fn to_i64(value: u64) -> AppResult<i64> {
    i64::try_from(value)
        .map_err(|_| AppError::Internal(format!("ledger value {} exceeds storage range", value)))
}

/// Postgres-backed reward ledger
pub struct PgRewardLedger {
    pool: PgPool,
}

impl PgRewardLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and bring the schema up to date.
    pub async fn connect(config: &crate::config::Config) -> AppResult<Self> {
        let pool = PgPool::connect(&config.database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RewardLedger for PgRewardLedger {
    async fn find_record(
        &self,
        user_id: Uuid,
        wallet: &str,
        asset_id: u64,
    ) -> AppResult<Option<RewardRecord>> {
        let row = sqlx::query_as::<_, RewardRecordRow>(
            r#"
            SELECT user_id, wallet_address, asset_id, temporary_tokens, converted_tokens, updated_at
            FROM reward_records
            WHERE user_id = $1 AND wallet_address = $2 AND asset_id = $3
            "#,
        )
        .bind(user_id)
        .bind(wallet)
        .bind(to_i64(asset_id)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RewardRecordRow::into_record).transpose()
    }

    async fn records_for_user(&self, user_id: Uuid, asset_id: u64) -> AppResult<Vec<RewardRecord>> {
        let rows = sqlx::query_as::<_, RewardRecordRow>(
            r#"
            SELECT user_id, wallet_address, asset_id, temporary_tokens, converted_tokens, updated_at
            FROM reward_records
            WHERE user_id = $1 AND asset_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .bind(to_i64(asset_id)?)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(RewardRecordRow::into_record)
            .collect()
    }

    async fn ensure_record(&self, user_id: Uuid, wallet: &str, asset_id: u64) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reward_records (user_id, wallet_address, asset_id, temporary_tokens, converted_tokens)
            VALUES ($1, $2, $3, 0, 0)
            ON CONFLICT (wallet_address, asset_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(wallet)
        .bind(to_i64(asset_id)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_temporary(
        &self,
        user_id: Uuid,
        wallet: &str,
        asset_id: u64,
        delta: i64,
    ) -> AppResult<()> {
        // Conditional update: the WHERE clause is what makes the decrement
        // atomic and keeps the balance non-negative under concurrent claims.
        let result = sqlx::query(
            r#"
            UPDATE reward_records
            SET temporary_tokens = temporary_tokens + $4, updated_at = NOW()
            WHERE user_id = $1 AND wallet_address = $2 AND asset_id = $3
              AND temporary_tokens + $4 >= 0
            "#,
        )
        .bind(user_id)
        .bind(wallet)
        .bind(to_i64(asset_id)?)
        .bind(delta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_record(user_id, wallet, asset_id).await? {
                Some(record) => Err(LedgerError::Underflow {
                    wallet: wallet.to_string(),
                    asset_id,
                    current: record.temporary_tokens,
                    delta,
                }
                .into()),
                None => Err(LedgerError::RecordNotFound {
                    wallet: wallet.to_string(),
                    asset_id,
                }
                .into()),
            };
        }

        Ok(())
    }

    async fn set_converted(&self, wallet: &str, asset_id: u64, converted: u64) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE reward_records
            SET converted_tokens = $3, updated_at = NOW()
            WHERE wallet_address = $1 AND asset_id = $2
            "#,
        )
        .bind(wallet)
        .bind(to_i64(asset_id)?)
        .bind(to_i64(converted)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_above_threshold(
        &self,
        asset_id: u64,
        threshold: u64,
        user_id: Option<Uuid>,
    ) -> AppResult<Vec<RewardRecord>> {
        let rows = sqlx::query_as::<_, RewardRecordRow>(
            r#"
            SELECT user_id, wallet_address, asset_id, temporary_tokens, converted_tokens, updated_at
            FROM reward_records
            WHERE asset_id = $1 AND temporary_tokens > $2
              AND ($3::uuid IS NULL OR user_id = $3)
            ORDER BY created_at
            "#,
        )
        .bind(to_i64(asset_id)?)
        .bind(to_i64(threshold)?)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(RewardRecordRow::into_record)
            .collect()
    }
}
