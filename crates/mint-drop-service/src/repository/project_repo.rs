//! 项目仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::ProjectStore;
use crate::error::Result;
use crate::models::{Project, ProjectDraft, normalize_hashtag};

const PROJECT_COLUMNS: &str = r#"
    id, name, hashtag, event_id, event_secret, require_secret_code, require_image,
    allow_multiple_claims, active, bot_account, eligible_template, not_eligible_template,
    already_claimed_template, no_links_template, created_at, updated_at
"#;

pub struct ProjectRepository {
    pool: PgPool,
}

impl ProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectStore for ProjectRepository {
    async fn list_active_projects(&self) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {} FROM projects WHERE active = TRUE ORDER BY id ASC",
            PROJECT_COLUMNS
        );
        let projects = sqlx::query_as::<_, Project>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(projects)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let sql = format!("SELECT {} FROM projects ORDER BY id ASC", PROJECT_COLUMNS);
        let projects = sqlx::query_as::<_, Project>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(projects)
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = $1", PROJECT_COLUMNS);
        let project = sqlx::query_as::<_, Project>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(project)
    }

    async fn create_project(&self, draft: &ProjectDraft) -> Result<Project> {
        let sql = format!(
            r#"
            INSERT INTO projects (
                name, hashtag, event_id, event_secret, require_secret_code, require_image,
                allow_multiple_claims, bot_account, eligible_template, not_eligible_template,
                already_claimed_template, no_links_template
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        );
        let project = sqlx::query_as::<_, Project>(&sql)
            .bind(&draft.name)
            .bind(normalize_hashtag(&draft.hashtag))
            .bind(&draft.event_id)
            .bind(&draft.event_secret)
            .bind(draft.require_secret_code)
            .bind(draft.require_image)
            .bind(draft.allow_multiple_claims)
            .bind(&draft.bot_account)
            .bind(&draft.eligible_template)
            .bind(&draft.not_eligible_template)
            .bind(&draft.already_claimed_template)
            .bind(&draft.no_links_template)
            .fetch_one(&self.pool)
            .await?;

        Ok(project)
    }

    async fn update_project(&self, id: i64, draft: &ProjectDraft) -> Result<Option<Project>> {
        let sql = format!(
            r#"
            UPDATE projects
            SET name = $2, hashtag = $3, event_id = $4, event_secret = $5,
                require_secret_code = $6, require_image = $7, allow_multiple_claims = $8,
                bot_account = $9, eligible_template = $10, not_eligible_template = $11,
                already_claimed_template = $12, no_links_template = $13, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        );
        let project = sqlx::query_as::<_, Project>(&sql)
            .bind(id)
            .bind(&draft.name)
            .bind(normalize_hashtag(&draft.hashtag))
            .bind(&draft.event_id)
            .bind(&draft.event_secret)
            .bind(draft.require_secret_code)
            .bind(draft.require_image)
            .bind(draft.allow_multiple_claims)
            .bind(&draft.bot_account)
            .bind(&draft.eligible_template)
            .bind(&draft.not_eligible_template)
            .bind(&draft.already_claimed_template)
            .bind(&draft.no_links_template)
            .fetch_optional(&self.pool)
            .await?;

        Ok(project)
    }

    async fn set_project_active(&self, id: i64, active: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE projects SET active = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
