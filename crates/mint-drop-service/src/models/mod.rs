//! 发放服务领域模型

pub mod delivery;
pub mod enums;
pub mod pool;
pub mod post;
pub mod project;

// 重新导出常用类型
pub use delivery::{Delivery, ProcessedPost};
pub use enums::{IngestChannel, Outcome, ReplyState, TemplateKind};
pub use pool::{MintLink, NewMintLink, PoolStats, SecretCode};
pub use post::{SocialPost, compare_post_ids, sort_oldest_first};
pub use project::{Project, ProjectDraft, normalize_hashtag};
