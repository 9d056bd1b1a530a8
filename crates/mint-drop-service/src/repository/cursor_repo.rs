//! 轮询高水位仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::CursorStore;
use crate::error::Result;

pub struct CursorRepository {
    pool: PgPool,
}

impl CursorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for CursorRepository {
    async fn get_cursor(&self, scope: &str) -> Result<Option<String>> {
        let since_id: Option<String> =
            sqlx::query_scalar("SELECT since_id FROM poll_cursors WHERE scope = $1")
                .bind(scope)
                .fetch_optional(&self.pool)
                .await?;

        Ok(since_id)
    }

    async fn advance_cursor(&self, scope: &str, since_id: &str) -> Result<()> {
        // 平台 ID 超出 BIGINT 范围的可能性存在，按 NUMERIC 比较
        sqlx::query(
            r#"
            INSERT INTO poll_cursors (scope, since_id)
            VALUES ($1, $2)
            ON CONFLICT (scope) DO UPDATE
            SET since_id = EXCLUDED.since_id, updated_at = NOW()
            WHERE poll_cursors.since_id::numeric < EXCLUDED.since_id::numeric
            "#,
        )
        .bind(scope)
        .bind(since_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
