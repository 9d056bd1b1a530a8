//! 内存存储
//!
//! 单把互斥锁保护全部状态，每个条件写操作在一次加锁内完成，
//! 与 PostgreSQL 实现提供相同的原子性保证。适用于测试和本地开发。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::traits::{
    CursorStore, DeliveryLedger, GrantDecision, GrantRequest, LeaseStore, ProjectStore,
    ReservationStore,
};
use crate::error::Result;
use crate::models::{
    Delivery, MintLink, NewMintLink, Outcome, PoolStats, ProcessedPost, Project, ProjectDraft,
    ReplyState, SecretCode, compare_post_ids, normalize_hashtag,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    projects: BTreeMap<i64, Project>,
    codes: Vec<SecretCode>,
    /// 按插入顺序存放，下标顺序即 FIFO 顺序
    links: Vec<MintLink>,
    deliveries: Vec<Delivery>,
    processed: HashMap<(String, i64), ProcessedPost>,
    cursors: HashMap<String, String>,
    leases: HashMap<String, (String, Instant)>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_delivery(&self, post_id: &str, project_id: i64) -> Option<&Delivery> {
        self.deliveries
            .iter()
            .find(|d| d.post_id == post_id && d.project_id == project_id)
    }

    fn consume_code(&mut self, project_id: i64, code: &str, user_id: &str) -> bool {
        match self
            .codes
            .iter_mut()
            .find(|c| c.project_id == project_id && c.code.eq_ignore_ascii_case(code) && !c.used)
        {
            Some(entry) => {
                entry.used = true;
                entry.used_by = Some(user_id.to_string());
                entry.used_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    fn reserve_link(&mut self, project_id: i64, user_id: &str) -> Option<MintLink> {
        let link = self
            .links
            .iter_mut()
            .find(|l| l.project_id == project_id && l.is_available())?;
        link.reserved_for = Some(user_id.to_string());
        link.reserved_at = Some(Utc::now());
        Some(link.clone())
    }

    fn apply_draft(project: &mut Project, draft: &ProjectDraft) {
        project.name = draft.name.clone();
        project.hashtag = normalize_hashtag(&draft.hashtag);
        project.event_id = draft.event_id.clone();
        project.event_secret = draft.event_secret.clone();
        project.require_secret_code = draft.require_secret_code;
        project.require_image = draft.require_image;
        project.allow_multiple_claims = draft.allow_multiple_claims;
        project.bot_account = draft.bot_account.clone();
        project.eligible_template = draft.eligible_template.clone();
        project.not_eligible_template = draft.not_eligible_template.clone();
        project.already_claimed_template = draft.already_claimed_template.clone();
        project.no_links_template = draft.no_links_template.clone();
        project.updated_at = Utc::now();
    }
}

/// 内存存储，克隆后共享同一份状态
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn list_active_projects(&self) -> Result<Vec<Project>> {
        let state = self.state.lock();
        Ok(state.projects.values().filter(|p| p.active).cloned().collect())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.state.lock().projects.values().cloned().collect())
    }

    async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        Ok(self.state.lock().projects.get(&id).cloned())
    }

    async fn create_project(&self, draft: &ProjectDraft) -> Result<Project> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut project = Project {
            id: state.next_id(),
            name: String::new(),
            hashtag: String::new(),
            event_id: None,
            event_secret: None,
            require_secret_code: false,
            require_image: false,
            allow_multiple_claims: false,
            active: false,
            bot_account: String::new(),
            eligible_template: None,
            not_eligible_template: None,
            already_claimed_template: None,
            no_links_template: None,
            created_at: now,
            updated_at: now,
        };
        MemoryState::apply_draft(&mut project, draft);
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn update_project(&self, id: i64, draft: &ProjectDraft) -> Result<Option<Project>> {
        let mut state = self.state.lock();
        Ok(state.projects.get_mut(&id).map(|project| {
            MemoryState::apply_draft(project, draft);
            project.clone()
        }))
    }

    async fn set_project_active(&self, id: i64, active: bool) -> Result<bool> {
        let mut state = self.state.lock();
        Ok(match state.projects.get_mut(&id) {
            Some(project) => {
                project.active = active;
                project.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn add_codes(&self, project_id: i64, codes: &[String]) -> Result<u64> {
        let mut state = self.state.lock();
        let mut inserted = 0;
        for code in codes {
            let exists = state
                .codes
                .iter()
                .any(|c| c.project_id == project_id && c.code == *code);
            if exists {
                continue;
            }
            let id = state.next_id();
            state.codes.push(SecretCode {
                id,
                project_id,
                code: code.clone(),
                used: false,
                used_by: None,
                used_at: None,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_codes(&self, project_id: i64) -> Result<Vec<SecretCode>> {
        let state = self.state.lock();
        Ok(state
            .codes
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn consume_code(&self, project_id: i64, code: &str, user_id: &str) -> Result<bool> {
        Ok(self.state.lock().consume_code(project_id, code, user_id))
    }

    async fn import_links(&self, project_id: i64, links: &[NewMintLink]) -> Result<u64> {
        let mut state = self.state.lock();
        let mut inserted = 0;
        for link in links {
            let exists = state
                .links
                .iter()
                .any(|l| l.project_id == project_id && l.qr_hash == link.qr_hash);
            if exists {
                continue;
            }
            let id = state.next_id();
            state.links.push(MintLink {
                id,
                project_id,
                qr_hash: link.qr_hash.clone(),
                claim_url: link.claim_url.clone(),
                claimed: false,
                reserved_for: None,
                reserved_at: None,
                claimed_by: None,
                claimed_at: None,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn list_links(&self, project_id: i64) -> Result<Vec<MintLink>> {
        let state = self.state.lock();
        Ok(state
            .links
            .iter()
            .filter(|l| l.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn reserve_link(&self, project_id: i64, user_id: &str) -> Result<Option<MintLink>> {
        Ok(self.state.lock().reserve_link(project_id, user_id))
    }

    async fn mark_links_claimed(&self, project_id: i64, qr_hashes: &[String]) -> Result<u64> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let mut claimed_ids = Vec::new();
        for link in state.links.iter_mut() {
            if link.project_id == project_id && !link.claimed && qr_hashes.contains(&link.qr_hash)
            {
                link.claimed = true;
                link.claimed_at = Some(now);
                claimed_ids.push(link.id);
            }
        }
        for delivery in state.deliveries.iter_mut() {
            if claimed_ids.contains(&delivery.mint_link_id) && !delivery.claimed {
                delivery.claimed = true;
                delivery.claimed_at = Some(now);
            }
        }
        Ok(claimed_ids.len() as u64)
    }

    async fn mark_link_claimed_by(
        &self,
        link_id: i64,
        claimed_by: &str,
    ) -> Result<Option<MintLink>> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let Some(link) = state.links.iter_mut().find(|l| l.id == link_id) else {
            return Ok(None);
        };
        link.claimed = true;
        link.claimed_by = Some(claimed_by.to_string());
        link.claimed_at = Some(now);
        let link = link.clone();

        for delivery in state.deliveries.iter_mut() {
            if delivery.mint_link_id == link_id && !delivery.claimed {
                delivery.claimed = true;
                delivery.claimed_at = Some(now);
            }
        }
        Ok(Some(link))
    }

    async fn get_link(&self, link_id: i64) -> Result<Option<MintLink>> {
        let state = self.state.lock();
        Ok(state.links.iter().find(|l| l.id == link_id).cloned())
    }

    async fn pool_stats(&self, project_id: i64) -> Result<PoolStats> {
        let state = self.state.lock();
        let mut stats = PoolStats::default();
        for link in state.links.iter().filter(|l| l.project_id == project_id) {
            stats.links_total += 1;
            if link.claimed {
                stats.links_claimed += 1;
            } else if link.reserved_for.is_some() {
                stats.links_reserved += 1;
            } else {
                stats.links_available += 1;
            }
        }
        for code in state.codes.iter().filter(|c| c.project_id == project_id) {
            stats.codes_total += 1;
            if code.used {
                stats.codes_used += 1;
            }
        }
        Ok(stats)
    }

    async fn grant(&self, request: &GrantRequest) -> Result<GrantDecision> {
        let mut state = self.state.lock();

        if let Some(existing) = state.find_delivery(&request.post_id, request.project_id) {
            return Ok(GrantDecision::AlreadyDelivered(existing.clone()));
        }

        if request.single_claim_per_user
            && state
                .deliveries
                .iter()
                .any(|d| d.project_id == request.project_id && d.user_id == request.user_id)
        {
            return Ok(GrantDecision::UserAlreadyClaimed);
        }

        // 先确认有可用链接再消费暗号，锁内两步等价于事务回滚
        let has_link = state
            .links
            .iter()
            .any(|l| l.project_id == request.project_id && l.is_available());

        if let Some(code) = &request.code {
            let usable = state.codes.iter().any(|c| {
                c.project_id == request.project_id && c.code.eq_ignore_ascii_case(code) && !c.used
            });
            if !usable {
                return Ok(GrantDecision::CodeAlreadyUsed);
            }
            if !has_link {
                return Ok(GrantDecision::NoLinksAvailable);
            }
            state.consume_code(request.project_id, code, &request.user_id);
        }

        let Some(link) = state.reserve_link(request.project_id, &request.user_id) else {
            return Ok(GrantDecision::NoLinksAvailable);
        };

        let delivery = Delivery {
            id: state.next_id(),
            post_id: request.post_id.clone(),
            project_id: request.project_id,
            user_id: request.user_id.clone(),
            username: request.username.clone(),
            mint_link_id: link.id,
            claim_url: link.claim_url,
            secret_code: request.code.clone(),
            reply_state: ReplyState::Pending,
            reply_id: None,
            delivered_at: Utc::now(),
            claimed: false,
            claimed_at: None,
        };
        state.deliveries.push(delivery.clone());
        Ok(GrantDecision::Granted(delivery))
    }
}

#[async_trait]
impl DeliveryLedger for MemoryStore {
    async fn find_delivery(&self, post_id: &str, project_id: i64) -> Result<Option<Delivery>> {
        Ok(self.state.lock().find_delivery(post_id, project_id).cloned())
    }

    async fn user_has_delivery(&self, project_id: i64, user_id: &str) -> Result<bool> {
        let state = self.state.lock();
        Ok(state
            .deliveries
            .iter()
            .any(|d| d.project_id == project_id && d.user_id == user_id))
    }

    async fn list_deliveries(&self, project_id: i64, limit: i64) -> Result<Vec<Delivery>> {
        let state = self.state.lock();
        Ok(state
            .deliveries
            .iter()
            .rev()
            .filter(|d| d.project_id == project_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_processed(
        &self,
        post_id: &str,
        project_id: i64,
    ) -> Result<Option<ProcessedPost>> {
        let state = self.state.lock();
        Ok(state
            .processed
            .get(&(post_id.to_string(), project_id))
            .cloned())
    }

    async fn record_evaluation(
        &self,
        post_id: &str,
        project_id: i64,
        user_id: &str,
        outcome: Outcome,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let now = Utc::now();
        state
            .processed
            .entry((post_id.to_string(), project_id))
            .and_modify(|row| {
                if outcome != Outcome::AlreadyDelivered {
                    row.outcome = outcome;
                    row.eligible = outcome.is_eligible();
                    row.evaluated_at = now;
                }
            })
            .or_insert_with(|| ProcessedPost {
                post_id: post_id.to_string(),
                project_id,
                user_id: user_id.to_string(),
                outcome,
                eligible: outcome.is_eligible(),
                reply_state: ReplyState::None,
                reply_id: None,
                last_error: None,
                evaluated_at: now,
                replied_at: None,
            });
        Ok(())
    }

    async fn claim_reply(&self, post_id: &str, project_id: i64, user_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let row = state
            .processed
            .entry((post_id.to_string(), project_id))
            .or_insert_with(|| ProcessedPost {
                post_id: post_id.to_string(),
                project_id,
                user_id: user_id.to_string(),
                outcome: Outcome::Granted,
                eligible: true,
                reply_state: ReplyState::None,
                reply_id: None,
                last_error: None,
                evaluated_at: Utc::now(),
                replied_at: None,
            });

        if matches!(row.reply_state, ReplyState::None | ReplyState::Failed) {
            row.reply_state = ReplyState::Sending;
            row.last_error = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn complete_reply(&self, post_id: &str, project_id: i64, reply_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(row) = state.processed.get_mut(&(post_id.to_string(), project_id)) {
            row.reply_state = ReplyState::Sent;
            row.reply_id = Some(reply_id.to_string());
            row.replied_at = Some(Utc::now());
            row.last_error = None;
        }
        if let Some(delivery) = state
            .deliveries
            .iter_mut()
            .find(|d| d.post_id == post_id && d.project_id == project_id)
        {
            delivery.reply_state = ReplyState::Sent;
            delivery.reply_id = Some(reply_id.to_string());
        }
        Ok(())
    }

    async fn fail_reply(&self, post_id: &str, project_id: i64, error: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(row) = state.processed.get_mut(&(post_id.to_string(), project_id))
            && row.reply_state == ReplyState::Sending
        {
            row.reply_state = ReplyState::Failed;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, scope: &str) -> Result<Option<String>> {
        Ok(self.state.lock().cursors.get(scope).cloned())
    }

    async fn advance_cursor(&self, scope: &str, since_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let current = state.cursors.get(scope);
        let newer = current.is_none_or(|c| compare_post_ids(c, since_id).is_lt());
        if newer {
            state.cursors.insert(scope.to_string(), since_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let free = match state.leases.get(key) {
            Some((holder, expires_at)) => *expires_at <= now || holder == owner,
            None => true,
        };
        if free {
            state
                .leases
                .insert(key.to_string(), (owner.to_string(), now + ttl));
        }
        Ok(free)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let held = state.leases.get(key).is_some_and(|(holder, _)| holder == owner);
        if held {
            state.leases.remove(key);
        }
        Ok(held)
    }
}
