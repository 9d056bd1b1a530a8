//! 发放记录与帖子处理审计仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::DeliveryLedger;
use crate::error::Result;
use crate::models::{Delivery, Outcome, ProcessedPost};

const DELIVERY_COLUMNS: &str = r#"
    id, post_id, project_id, user_id, username, mint_link_id, claim_url, secret_code,
    reply_state, reply_id, delivered_at, claimed, claimed_at
"#;

pub struct DeliveryRepository {
    pool: PgPool,
}

impl DeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLedger for DeliveryRepository {
    async fn find_delivery(&self, post_id: &str, project_id: i64) -> Result<Option<Delivery>> {
        let sql = format!(
            "SELECT {} FROM deliveries WHERE post_id = $1 AND project_id = $2",
            DELIVERY_COLUMNS
        );
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(post_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(delivery)
    }

    async fn user_has_delivery(&self, project_id: i64, user_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM deliveries WHERE project_id = $1 AND user_id = $2)",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_deliveries(&self, project_id: i64, limit: i64) -> Result<Vec<Delivery>> {
        let sql = format!(
            r#"
            SELECT {} FROM deliveries
            WHERE project_id = $1
            ORDER BY delivered_at DESC, id DESC
            LIMIT $2
            "#,
            DELIVERY_COLUMNS
        );
        let deliveries = sqlx::query_as::<_, Delivery>(&sql)
            .bind(project_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(deliveries)
    }

    async fn get_processed(
        &self,
        post_id: &str,
        project_id: i64,
    ) -> Result<Option<ProcessedPost>> {
        let processed = sqlx::query_as::<_, ProcessedPost>(
            r#"
            SELECT post_id, project_id, user_id, outcome, eligible, reply_state, reply_id,
                   last_error, evaluated_at, replied_at
            FROM processed_posts
            WHERE post_id = $1 AND project_id = $2
            "#,
        )
        .bind(post_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(processed)
    }

    async fn record_evaluation(
        &self,
        post_id: &str,
        project_id: i64,
        user_id: &str,
        outcome: Outcome,
    ) -> Result<()> {
        // 重复采集得到的 already_delivered 不覆盖首次评估结果
        sqlx::query(
            r#"
            INSERT INTO processed_posts (post_id, project_id, user_id, outcome, eligible)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (post_id, project_id) DO UPDATE
            SET outcome = EXCLUDED.outcome,
                eligible = EXCLUDED.eligible,
                evaluated_at = NOW()
            WHERE EXCLUDED.outcome <> 'already_delivered'
            "#,
        )
        .bind(post_id)
        .bind(project_id)
        .bind(user_id)
        .bind(outcome)
        .bind(outcome.is_eligible())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_reply(&self, post_id: &str, project_id: i64, user_id: &str) -> Result<bool> {
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO processed_posts (post_id, project_id, user_id, outcome, reply_state)
            VALUES ($1, $2, $3, 'granted', 'sending')
            ON CONFLICT (post_id, project_id) DO UPDATE
            SET reply_state = 'sending', last_error = NULL
            WHERE processed_posts.reply_state IN ('none', 'failed')
            RETURNING post_id
            "#,
        )
        .bind(post_id)
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn complete_reply(&self, post_id: &str, project_id: i64, reply_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE processed_posts
            SET reply_state = 'sent', reply_id = $3, replied_at = NOW(), last_error = NULL
            WHERE post_id = $1 AND project_id = $2
            "#,
        )
        .bind(post_id)
        .bind(project_id)
        .bind(reply_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE deliveries
            SET reply_state = 'sent', reply_id = $3
            WHERE post_id = $1 AND project_id = $2
            "#,
        )
        .bind(post_id)
        .bind(project_id)
        .bind(reply_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_reply(&self, post_id: &str, project_id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processed_posts
            SET reply_state = 'failed', last_error = $3
            WHERE post_id = $1 AND project_id = $2 AND reply_state = 'sending'
            "#,
        )
        .bind(post_id)
        .bind(project_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
