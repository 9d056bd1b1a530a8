//! 运营管理服务
//!
//! 项目配置、资源池维护与发放记录查询

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};
use validator::Validate;

use super::code_generator::{generate_codes, is_valid_code};
use super::dto::{
    AddCodesRequest, ClaimLinkRequest, GenerateCodesRequest, ImportLinksRequest, ImportReport,
    ProjectRequest,
};
use crate::clients::IssuanceClient;
use crate::error::{DropError, Result};
use crate::models::{
    Delivery, MintLink, NewMintLink, PoolStats, Project, ProjectDraft, SecretCode,
};
use crate::repository::{DeliveryLedger, ProjectStore, ReservationStore};

/// 发放记录单次查询上限
const MAX_DELIVERY_PAGE: i64 = 500;

pub struct AdminService {
    projects: Arc<dyn ProjectStore>,
    reservations: Arc<dyn ReservationStore>,
    ledger: Arc<dyn DeliveryLedger>,
    /// 未配置发行 API 时同步与代领不可用
    issuance: Option<Arc<dyn IssuanceClient>>,
}

impl AdminService {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        reservations: Arc<dyn ReservationStore>,
        ledger: Arc<dyn DeliveryLedger>,
        issuance: Option<Arc<dyn IssuanceClient>>,
    ) -> Self {
        Self {
            projects,
            reservations,
            ledger,
            issuance,
        }
    }

    fn issuance(&self) -> Result<&Arc<dyn IssuanceClient>> {
        self.issuance
            .as_ref()
            .ok_or_else(|| DropError::MissingCredential("发行 API 未配置".to_string()))
    }

    async fn require_project(&self, id: i64) -> Result<Project> {
        self.projects
            .get_project(id)
            .await?
            .ok_or(DropError::ProjectNotFound(id))
    }

    // ==================== 项目 ====================

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.projects.list_projects().await
    }

    pub async fn get_project(&self, id: i64) -> Result<Project> {
        self.require_project(id).await
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_project(&self, request: ProjectRequest) -> Result<Project> {
        request.validate()?;
        let project = self.projects.create_project(&ProjectDraft::from(request)).await?;
        info!(project_id = project.id, hashtag = %project.hashtag, "项目已创建");
        Ok(project)
    }

    #[instrument(skip(self, request))]
    pub async fn update_project(&self, id: i64, request: ProjectRequest) -> Result<Project> {
        request.validate()?;
        self.projects
            .update_project(id, &ProjectDraft::from(request))
            .await?
            .ok_or(DropError::ProjectNotFound(id))
    }

    #[instrument(skip(self))]
    pub async fn set_active(&self, id: i64, active: bool) -> Result<Project> {
        if !self.projects.set_project_active(id, active).await? {
            return Err(DropError::ProjectNotFound(id));
        }
        info!(project_id = id, active, "项目状态已更新");
        self.require_project(id).await
    }

    // ==================== 暗号 ====================

    /// 添加指定暗号，统一转大写；含字符表之外字符的条目被拒绝
    #[instrument(skip(self, request), fields(count = request.codes.len()))]
    pub async fn add_codes(&self, project_id: i64, request: AddCodesRequest) -> Result<ImportReport> {
        request.validate()?;
        self.require_project(project_id).await?;

        let mut report = ImportReport {
            submitted: request.codes.len() as u64,
            ..Default::default()
        };
        let mut accepted = Vec::with_capacity(request.codes.len());
        for raw in &request.codes {
            let code = raw.trim().to_uppercase();
            if is_valid_code(&code) {
                accepted.push(code);
            } else {
                report.rejected += 1;
            }
        }

        report.inserted = self.reservations.add_codes(project_id, &accepted).await?;
        info!(project_id, inserted = report.inserted, rejected = report.rejected, "暗号已添加");
        Ok(report)
    }

    /// 生成暗号并入库，返回新生成的暗号
    #[instrument(skip(self, request), fields(count = request.count, length = request.length))]
    pub async fn generate_codes(
        &self,
        project_id: i64,
        request: GenerateCodesRequest,
    ) -> Result<Vec<String>> {
        request.validate()?;
        self.require_project(project_id).await?;

        let existing: HashSet<String> = self
            .reservations
            .list_codes(project_id)
            .await?
            .into_iter()
            .map(|c| c.code)
            .collect();
        let codes = generate_codes(request.count, request.length, &existing)?;
        let inserted = self.reservations.add_codes(project_id, &codes).await?;
        if inserted != codes.len() as u64 {
            warn!(project_id, inserted, generated = codes.len(), "部分生成的暗号未入库");
        }
        Ok(codes)
    }

    pub async fn list_codes(&self, project_id: i64) -> Result<Vec<SecretCode>> {
        self.require_project(project_id).await?;
        self.reservations.list_codes(project_id).await
    }

    // ==================== 领取链接 ====================

    /// 导入领取地址，hash 取地址最后一段
    #[instrument(skip(self, request), fields(count = request.claim_urls.len()))]
    pub async fn import_links(
        &self,
        project_id: i64,
        request: ImportLinksRequest,
    ) -> Result<ImportReport> {
        request.validate()?;
        self.require_project(project_id).await?;

        let mut report = ImportReport {
            submitted: request.claim_urls.len() as u64,
            ..Default::default()
        };
        let mut links = Vec::with_capacity(request.claim_urls.len());
        for url in &request.claim_urls {
            match NewMintLink::from_claim_url(url) {
                Some(link) => links.push(link),
                None => report.rejected += 1,
            }
        }

        report.inserted = self.reservations.import_links(project_id, &links).await?;
        info!(project_id, inserted = report.inserted, "领取链接已导入");
        Ok(report)
    }

    /// 从发行 API 同步链接
    ///
    /// 新出现且未领取的链接入库；发行方报告已领取的链接标记为 claimed，并同步发放记录
    #[instrument(skip(self))]
    pub async fn sync_links(&self, project_id: i64) -> Result<ImportReport> {
        let project = self.require_project(project_id).await?;
        let issuance = self.issuance()?;
        let (Some(event_id), Some(event_secret)) = (&project.event_id, &project.event_secret)
        else {
            return Err(DropError::Validation(format!(
                "项目 {} 未配置发行活动 ID 或密钥",
                project_id
            )));
        };

        let issued = issuance.list_links(event_id, event_secret).await?;
        let mut fresh = Vec::new();
        let mut claimed = Vec::new();
        for link in &issued {
            if link.claimed {
                claimed.push(link.qr_hash.clone());
            } else {
                fresh.push(NewMintLink {
                    qr_hash: link.qr_hash.clone(),
                    claim_url: issuance.claim_url(&link.qr_hash),
                });
            }
        }

        let report = ImportReport {
            submitted: issued.len() as u64,
            inserted: self.reservations.import_links(project_id, &fresh).await?,
            rejected: 0,
            marked_claimed: self
                .reservations
                .mark_links_claimed(project_id, &claimed)
                .await?,
        };
        info!(
            project_id,
            inserted = report.inserted,
            marked_claimed = report.marked_claimed,
            "领取链接已同步"
        );
        Ok(report)
    }

    /// 通过发行 API 为受益人领取指定链接
    #[instrument(skip(self, request))]
    pub async fn claim_link(&self, link_id: i64, request: ClaimLinkRequest) -> Result<MintLink> {
        request.validate()?;
        let issuance = self.issuance()?;
        let link = self
            .reservations
            .get_link(link_id)
            .await?
            .ok_or(DropError::MintLinkNotFound(link_id))?;
        if link.claimed {
            return Err(DropError::Validation(format!("链接 {} 已被领取", link_id)));
        }

        let secret = issuance.claim_secret(&link.qr_hash).await?;
        issuance
            .claim(&link.qr_hash, &secret, &request.beneficiary)
            .await?;

        let updated = self
            .reservations
            .mark_link_claimed_by(link_id, &request.beneficiary)
            .await?
            .ok_or(DropError::MintLinkNotFound(link_id))?;
        info!(link_id, "链接已代领");
        Ok(updated)
    }

    pub async fn list_links(&self, project_id: i64) -> Result<Vec<MintLink>> {
        self.require_project(project_id).await?;
        self.reservations.list_links(project_id).await
    }

    // ==================== 统计与记录 ====================

    pub async fn pool_stats(&self, project_id: i64) -> Result<PoolStats> {
        self.require_project(project_id).await?;
        self.reservations.pool_stats(project_id).await
    }

    pub async fn list_deliveries(&self, project_id: i64, limit: Option<i64>) -> Result<Vec<Delivery>> {
        self.require_project(project_id).await?;
        let limit = limit.unwrap_or(100).clamp(1, MAX_DELIVERY_PAGE);
        self.ledger.list_deliveries(project_id, limit).await
    }
}
