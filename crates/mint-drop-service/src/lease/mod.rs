//! 运行租约
//!
//! 保证同一时刻只有一个实例执行轮询批次。Redis 可用时使用 `SET NX PX`，
//! 不可用时降级到数据库租约表。
//!
//! ```ignore
//! let leases = LeaseManager::new(redis_client, store, Duration::from_secs(300));
//! if let Some(guard) = leases.try_acquire("poll-run").await? {
//!     run_batch().await?;
//!     guard.release().await?;
//! }
//! ```

mod lease_manager;

pub use lease_manager::{LeaseGuard, LeaseManager, POLL_RUN_LEASE};
