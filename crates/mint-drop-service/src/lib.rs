//! 铸造链接发放服务
//!
//! 监听社交平台上带项目话题标签的帖子，按项目规则判定资格，
//! 为合格用户预留一个一次性领取链接并回复到原帖。
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 存储层（PostgreSQL 与内存实现）
//! - `service`: 资格判定、发放管道与管理服务
//! - `reply`: 回复模板与发送
//! - `clients`: 社交平台与发行 API 客户端
//! - `ingest`: 推送与轮询两条采集通道
//! - `lease`: 运行租约
//! - `handlers` / `routes` / `middleware`: HTTP 入口

pub mod clients;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod lease;
pub mod middleware;
pub mod models;
pub mod reply;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;

pub use error::{DropError, ExternalFailure, Result};
pub use models::{IngestChannel, Outcome, Project, SocialPost};
pub use service::{DeliveryPipeline, PostReport, RunStats};
