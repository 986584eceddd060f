//! Postgres-backed token quota.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::models::Capacity;
use crate::common::UserId;
use crate::kernel::QuotaService;

/// Usage window; counters reset once it has elapsed.
pub const RESET_WINDOW_HOURS: i64 = 6;

const SUPERADMIN_ROLE: &str = "superadmin";

#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    role: String,
    tokens_used: i64,
    tokens_limit: i64,
    reset_at: DateTime<Utc>,
}

pub struct PgQuotaService {
    pool: PgPool,
}

impl PgQuotaService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaService for PgQuotaService {
    async fn check_capacity(&self, user_id: UserId) -> Result<Capacity> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "SELECT role, tokens_used, tokens_limit, reset_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .with_context(|| format!("user {} not found", user_id))?;

        if row.role == SUPERADMIN_ROLE {
            return Ok(Capacity::unlimited(row.tokens_used));
        }

        let mut used = row.tokens_used;
        let now = Utc::now();
        if now > row.reset_at {
            debug!(user_id = %user_id, "Usage window elapsed; resetting counter");
            sqlx::query("UPDATE users SET tokens_used = 0, reset_at = $2 WHERE id = $1")
                .bind(user_id)
                .bind(now + Duration::hours(RESET_WINDOW_HOURS))
                .execute(&self.pool)
                .await?;
            used = 0;
        }

        Ok(Capacity::limited(used, row.tokens_limit))
    }

    async fn increment_usage(&self, user_id: UserId, amount: i64) -> Result<()> {
        sqlx::query("UPDATE users SET tokens_used = tokens_used + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
