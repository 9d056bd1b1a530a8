//! 资源池仓储
//!
//! 暗号消费与链接预留都是单条条件 UPDATE；发放事务把查重、消费、预留和
//! 写入发放记录放在同一个事务里，任一环节被拒绝都整体回滚。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};

use super::traits::{GrantDecision, GrantRequest, ReservationStore};
use crate::error::Result;
use crate::models::{Delivery, MintLink, NewMintLink, PoolStats, SecretCode};

const LINK_COLUMNS: &str = r#"
    id, project_id, qr_hash, claim_url, claimed, reserved_for, reserved_at,
    claimed_by, claimed_at, created_at
"#;

const DELIVERY_COLUMNS: &str = r#"
    id, post_id, project_id, user_id, username, mint_link_id, claim_url, secret_code,
    reply_state, reply_id, delivered_at, claimed, claimed_at
"#;

pub struct ReservationRepository {
    pool: PgPool,
}

impl ReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中条件消费暗号
    ///
    /// 暗号匹配不区分大小写；`used = FALSE` 谓词保证并发调用者中至多一个成功
    pub async fn consume_code_in_tx(
        tx: &mut PgConnection,
        project_id: i64,
        code: &str,
        user_id: &str,
    ) -> Result<bool> {
        let consumed: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE secret_codes
            SET used = TRUE, used_by = $3, used_at = NOW()
            WHERE project_id = $1 AND UPPER(code) = UPPER($2) AND used = FALSE
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(code)
        .bind(user_id)
        .fetch_optional(tx)
        .await?;

        Ok(consumed.is_some())
    }

    /// 在事务中按 FIFO 预留链接
    ///
    /// 子查询以 FOR UPDATE SKIP LOCKED 选中最早的可用行，外层 UPDATE 在同一语句内完成标记，
    /// 并发事务会跳过已被锁定的行而不是等待后拿到同一条链接
    pub async fn reserve_link_in_tx(
        tx: &mut PgConnection,
        project_id: i64,
        user_id: &str,
    ) -> Result<Option<MintLink>> {
        let sql = format!(
            r#"
            UPDATE mint_links
            SET reserved_for = $2, reserved_at = NOW()
            WHERE id = (
                SELECT id FROM mint_links
                WHERE project_id = $1 AND claimed = FALSE AND reserved_for IS NULL
                ORDER BY id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            LINK_COLUMNS
        );
        let link = sqlx::query_as::<_, MintLink>(&sql)
            .bind(project_id)
            .bind(user_id)
            .fetch_optional(tx)
            .await?;

        Ok(link)
    }

    async fn find_delivery_in_tx(
        tx: &mut PgConnection,
        post_id: &str,
        project_id: i64,
    ) -> Result<Option<Delivery>> {
        let sql = format!(
            "SELECT {} FROM deliveries WHERE post_id = $1 AND project_id = $2",
            DELIVERY_COLUMNS
        );
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(post_id)
            .bind(project_id)
            .fetch_optional(tx)
            .await?;

        Ok(delivery)
    }

    async fn insert_delivery_in_tx(
        tx: &mut PgConnection,
        request: &GrantRequest,
        link: &MintLink,
    ) -> Result<Delivery> {
        let sql = format!(
            r#"
            INSERT INTO deliveries (
                post_id, project_id, user_id, username, mint_link_id, claim_url,
                secret_code, reply_state
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            RETURNING {}
            "#,
            DELIVERY_COLUMNS
        );
        let delivery = sqlx::query_as::<_, Delivery>(&sql)
            .bind(&request.post_id)
            .bind(request.project_id)
            .bind(&request.user_id)
            .bind(&request.username)
            .bind(link.id)
            .bind(&link.claim_url)
            .bind(&request.code)
            .fetch_one(tx)
            .await?;

        Ok(delivery)
    }

    /// 事务级 advisory lock，事务结束自动释放
    async fn lock_key_in_tx(tx: &mut PgConnection, key: &str) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for ReservationRepository {
    async fn add_codes(&self, project_id: i64, codes: &[String]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO secret_codes (project_id, code)
            SELECT $1, UNNEST($2::varchar[])
            ON CONFLICT (project_id, code) DO NOTHING
            "#,
        )
        .bind(project_id)
        .bind(codes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_codes(&self, project_id: i64) -> Result<Vec<SecretCode>> {
        let codes = sqlx::query_as::<_, SecretCode>(
            r#"
            SELECT id, project_id, code, used, used_by, used_at, created_at
            FROM secret_codes
            WHERE project_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn consume_code(&self, project_id: i64, code: &str, user_id: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::consume_code_in_tx(&mut conn, project_id, code, user_id).await
    }

    async fn import_links(&self, project_id: i64, links: &[NewMintLink]) -> Result<u64> {
        let hashes: Vec<String> = links.iter().map(|l| l.qr_hash.clone()).collect();
        let urls: Vec<String> = links.iter().map(|l| l.claim_url.clone()).collect();

        // WITH ORDINALITY 保持导入顺序，链接 ID 的先后即 FIFO 顺序
        let result = sqlx::query(
            r#"
            INSERT INTO mint_links (project_id, qr_hash, claim_url)
            SELECT $1, t.qr_hash, t.claim_url
            FROM UNNEST($2::varchar[], $3::text[]) WITH ORDINALITY AS t(qr_hash, claim_url, ord)
            ORDER BY t.ord
            ON CONFLICT (project_id, qr_hash) DO NOTHING
            "#,
        )
        .bind(project_id)
        .bind(&hashes)
        .bind(&urls)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_links(&self, project_id: i64) -> Result<Vec<MintLink>> {
        let sql = format!(
            "SELECT {} FROM mint_links WHERE project_id = $1 ORDER BY id ASC",
            LINK_COLUMNS
        );
        let links = sqlx::query_as::<_, MintLink>(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(links)
    }

    async fn reserve_link(&self, project_id: i64, user_id: &str) -> Result<Option<MintLink>> {
        let mut conn = self.pool.acquire().await?;
        Self::reserve_link_in_tx(&mut conn, project_id, user_id).await
    }

    async fn mark_links_claimed(&self, project_id: i64, qr_hashes: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let claimed_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE mint_links
            SET claimed = TRUE, claimed_at = COALESCE(claimed_at, NOW())
            WHERE project_id = $1 AND qr_hash = ANY($2) AND claimed = FALSE
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(qr_hashes)
        .fetch_all(&mut *tx)
        .await?;

        if !claimed_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE deliveries
                SET claimed = TRUE, claimed_at = NOW()
                WHERE mint_link_id = ANY($1) AND claimed = FALSE
                "#,
            )
            .bind(&claimed_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(claimed_ids.len() as u64)
    }

    async fn mark_link_claimed_by(
        &self,
        link_id: i64,
        claimed_by: &str,
    ) -> Result<Option<MintLink>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE mint_links
            SET claimed = TRUE, claimed_by = $2, claimed_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            LINK_COLUMNS
        );
        let link = sqlx::query_as::<_, MintLink>(&sql)
            .bind(link_id)
            .bind(claimed_by)
            .fetch_optional(&mut *tx)
            .await?;

        if link.is_some() {
            sqlx::query(
                r#"
                UPDATE deliveries SET claimed = TRUE, claimed_at = NOW()
                WHERE mint_link_id = $1 AND claimed = FALSE
                "#,
            )
            .bind(link_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(link)
    }

    async fn get_link(&self, link_id: i64) -> Result<Option<MintLink>> {
        let sql = format!("SELECT {} FROM mint_links WHERE id = $1", LINK_COLUMNS);
        let link = sqlx::query_as::<_, MintLink>(&sql)
            .bind(link_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(link)
    }

    async fn pool_stats(&self, project_id: i64) -> Result<PoolStats> {
        let stats = sqlx::query_as::<_, PoolStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM mint_links WHERE project_id = $1) AS links_total,
                (SELECT COUNT(*) FROM mint_links
                    WHERE project_id = $1 AND claimed = FALSE AND reserved_for IS NULL) AS links_available,
                (SELECT COUNT(*) FROM mint_links
                    WHERE project_id = $1 AND claimed = FALSE AND reserved_for IS NOT NULL) AS links_reserved,
                (SELECT COUNT(*) FROM mint_links
                    WHERE project_id = $1 AND claimed = TRUE) AS links_claimed,
                (SELECT COUNT(*) FROM secret_codes WHERE project_id = $1) AS codes_total,
                (SELECT COUNT(*) FROM secret_codes WHERE project_id = $1 AND used = TRUE) AS codes_used
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    #[instrument(skip(self, request), fields(post_id = %request.post_id, project_id = request.project_id))]
    async fn grant(&self, request: &GrantRequest) -> Result<GrantDecision> {
        let mut tx = self.pool.begin().await?;

        // 同一 (post, project) 的并发发放串行化，失败方能看到胜出方写入的发放记录
        let post_key = format!("post:{}:{}", request.project_id, request.post_id);
        Self::lock_key_in_tx(&mut tx, &post_key).await?;

        if let Some(existing) =
            Self::find_delivery_in_tx(&mut tx, &request.post_id, request.project_id).await?
        {
            tx.rollback().await?;
            debug!("帖子已有发放记录");
            return Ok(GrantDecision::AlreadyDelivered(existing));
        }

        if request.single_claim_per_user {
            let user_key = format!("user:{}:{}", request.project_id, request.user_id);
            Self::lock_key_in_tx(&mut tx, &user_key).await?;

            let claimed: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM deliveries WHERE project_id = $1 AND user_id = $2)",
            )
            .bind(request.project_id)
            .bind(&request.user_id)
            .fetch_one(&mut *tx)
            .await?;

            if claimed {
                tx.rollback().await?;
                return Ok(GrantDecision::UserAlreadyClaimed);
            }
        }

        if let Some(code) = &request.code {
            let consumed =
                Self::consume_code_in_tx(&mut tx, request.project_id, code, &request.user_id)
                    .await?;
            if !consumed {
                tx.rollback().await?;
                return Ok(GrantDecision::CodeAlreadyUsed);
            }
        }

        let Some(link) =
            Self::reserve_link_in_tx(&mut tx, request.project_id, &request.user_id).await?
        else {
            // 回滚同时撤销上面的暗号消费
            tx.rollback().await?;
            return Ok(GrantDecision::NoLinksAvailable);
        };

        let delivery = Self::insert_delivery_in_tx(&mut tx, request, &link).await?;
        tx.commit().await?;

        debug!(mint_link_id = link.id, "发放事务提交");
        Ok(GrantDecision::Granted(delivery))
    }
}
