//! 应用状态定义

use std::sync::Arc;

use mint_drop_shared::database::Database;

use crate::ingest::{PollWorker, WebhookProcessor};
use crate::service::AdminService;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub admin: Arc<AdminService>,
    pub webhook: Arc<WebhookProcessor>,
    pub poller: Arc<PollWorker>,
    /// 管理接口 API Key，未配置时管理接口全部拒绝
    pub admin_api_key: Option<Arc<str>>,
    /// 就绪探针检查用，内存存储运行时为空
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        admin: Arc<AdminService>,
        webhook: Arc<WebhookProcessor>,
        poller: Arc<PollWorker>,
        admin_api_key: Option<String>,
    ) -> Self {
        Self {
            admin,
            webhook,
            poller,
            admin_api_key: admin_api_key.filter(|k| !k.is_empty()).map(Arc::from),
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
