//! 铸造链接发放服务
//!
//! 推送入口、管理接口与轮询 Worker 运行在同一进程中。

use std::sync::Arc;
use std::time::Duration;

use mint_drop::{
    clients::{
        CachedTokenProvider, ClientCredentialsFetcher, CredentialProvider, HttpIssuanceClient,
        HttpSocialClient, IssuanceClient, SocialClient, StaticTokenProvider,
    },
    ingest::{PollWorker, WebhookProcessor},
    lease::LeaseManager,
    reply::{ReplyDispatcher, TemplateEngine},
    repository::{
        CursorRepository, DeliveryLedger, DeliveryRepository, LeaseRepository, ProjectRepository,
        ProjectStore, ReservationRepository, ReservationStore,
    },
    routes,
    service::{AdminService, DeliveryPipeline},
    state::AppState,
};
use mint_drop_shared::{
    config::{AppConfig, IssuanceConfig},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("mint-drop-service").unwrap_or_default();

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting mint-drop-service on {}", config.server_addr());

    // 初始化基础设施
    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    let redis_client = match config.redis.url.as_deref() {
        Some(url) if !url.is_empty() => Some(redis::Client::open(url)?),
        _ => {
            info!("Redis 未配置，运行租约使用数据库");
            None
        }
    };

    // 存储层
    let pool = db.pool().clone();
    let projects: Arc<dyn ProjectStore> = Arc::new(ProjectRepository::new(pool.clone()));
    let reservations: Arc<dyn ReservationStore> =
        Arc::new(ReservationRepository::new(pool.clone()));
    let ledger: Arc<dyn DeliveryLedger> = Arc::new(DeliveryRepository::new(pool.clone()));
    let cursors = Arc::new(CursorRepository::new(pool.clone()));
    let leases = Arc::new(LeaseManager::new(
        redis_client,
        Arc::new(LeaseRepository::new(pool)),
        Duration::from_secs(config.poller.lease_ttl_secs),
    ));

    // 外部客户端
    let social: Arc<dyn SocialClient> = Arc::new(HttpSocialClient::new(&config.social)?);
    let issuance = build_issuance_client(&config.issuance)?;

    // 发放管道
    let dispatcher =
        ReplyDispatcher::new(social.clone(), ledger.clone(), TemplateEngine::with_defaults());
    let pipeline = Arc::new(DeliveryPipeline::new(
        reservations.clone(),
        ledger.clone(),
        dispatcher,
    ));

    let poller = Arc::new(PollWorker::new(
        projects.clone(),
        cursors,
        social.clone(),
        pipeline.clone(),
        leases,
        &config.poller,
    ));
    if config.poller.enabled {
        let worker = poller.clone();
        tokio::spawn(async move {
            worker.run().await;
        });
    } else {
        info!("轮询 Worker 已禁用");
    }

    let webhook = Arc::new(WebhookProcessor::new(
        projects.clone(),
        social,
        pipeline,
        config.social.consumer_secret.clone(),
        Duration::from_secs(config.webhook.processing_budget_secs),
    ));
    let admin = Arc::new(AdminService::new(projects, reservations, ledger, issuance));

    if config.admin.api_key.as_deref().is_none_or(str::is_empty) {
        warn!("管理接口 API Key 未配置，管理接口将拒绝所有请求");
    }
    let state = AppState::new(admin, webhook, poller, config.admin.api_key.clone())
        .with_database(db.clone());
    let app = routes::build_router(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 发行 API 客户端；缺少 API key 或访问凭证时管理接口的同步与代领不可用
fn build_issuance_client(
    config: &IssuanceConfig,
) -> anyhow::Result<Option<Arc<dyn IssuanceClient>>> {
    if config.api_key.is_none() {
        warn!("发行 API key 未配置，链接同步与代领不可用");
        return Ok(None);
    }

    let credentials: Arc<dyn CredentialProvider> =
        match ClientCredentialsFetcher::from_config(config)? {
            Some(fetcher) => Arc::new(CachedTokenProvider::new(
                fetcher,
                Duration::from_secs(config.token_lifetime_secs),
            )),
            None => match config.access_token.as_deref() {
                Some(token) => Arc::new(StaticTokenProvider::new(token)),
                None => {
                    warn!("发行 API 访问凭证未配置，链接同步与代领不可用");
                    return Ok(None);
                }
            },
        };

    Ok(Some(Arc::new(HttpIssuanceClient::new(config, credentials)?)))
}

/// 监听关闭信号
///
/// 收到 SIGTERM 或 Ctrl+C 后返回，触发 axum 的优雅关闭流程
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
