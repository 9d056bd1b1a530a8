//! 运行租约仓储（PostgreSQL 实现）
//!
//! Redis 未配置或不可用时由 LeaseManager 回退到这里

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::LeaseStore;
use crate::error::Result;

pub struct LeaseRepository {
    pool: PgPool,
}

impl LeaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for LeaseRepository {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        // 只有已过期（或本人持有）的租约才会被覆盖
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO run_leases (lease_key, owner, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (lease_key) DO UPDATE
            SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at, acquired_at = NOW()
            WHERE run_leases.expires_at < NOW() OR run_leases.owner = EXCLUDED.owner
            RETURNING owner
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.is_some())
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM run_leases WHERE lease_key = $1 AND owner = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
