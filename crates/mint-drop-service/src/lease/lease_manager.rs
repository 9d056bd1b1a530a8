//! 租约管理器

use std::sync::Arc;
use std::time::Duration;

use redis::Client as RedisClient;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{DropError, Result};
use crate::repository::LeaseStore;

/// 轮询批次租约
pub const POLL_RUN_LEASE: &str = "poll-run";

const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

const RENEW_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("pexpire", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

pub struct LeaseManager {
    redis_client: Option<RedisClient>,
    store: Arc<dyn LeaseStore>,
    ttl: Duration,
    /// 实例唯一标识
    instance_id: String,
}

impl LeaseManager {
    pub fn new(redis_client: Option<RedisClient>, store: Arc<dyn LeaseStore>, ttl: Duration) -> Self {
        Self {
            redis_client,
            store,
            ttl,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 尝试获取租约，已被其他实例持有时返回 None
    ///
    /// Redis 出错时降级到数据库租约
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn try_acquire(&self, key: &str) -> Result<Option<LeaseGuard>> {
        // owner 格式: instance_id:uuid
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());

        if let Some(ref client) = self.redis_client {
            match try_redis_lease(client, key, &owner, self.ttl).await {
                Ok(true) => {
                    debug!(key = %key, owner = %owner, "已获取 Redis 租约");
                    return Ok(Some(LeaseGuard {
                        key: key.to_string(),
                        owner,
                        ttl: self.ttl,
                        backend: LeaseBackend::Redis(client.clone()),
                        released: false,
                    }));
                }
                Ok(false) => return Ok(None),
                Err(e) => {
                    warn!(key = %key, error = %e, "Redis 租约失败，降级到数据库");
                }
            }
        }

        if self.store.try_acquire(key, &owner, self.ttl).await? {
            debug!(key = %key, owner = %owner, "已获取数据库租约");
            Ok(Some(LeaseGuard {
                key: key.to_string(),
                owner,
                ttl: self.ttl,
                backend: LeaseBackend::Store(self.store.clone()),
                released: false,
            }))
        } else {
            Ok(None)
        }
    }
}

/// SET NX PX，仅在 key 不存在时写入
async fn try_redis_lease(
    client: &RedisClient,
    key: &str,
    owner: &str,
    ttl: Duration,
) -> std::result::Result<bool, redis::RedisError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let result: Option<String> = redis::cmd("SET")
        .arg(format!("lease:{}", key))
        .arg(owner)
        .arg("NX")
        .arg("PX")
        .arg(ttl.as_millis() as u64)
        .query_async(&mut conn)
        .await?;
    Ok(result.is_some())
}

enum LeaseBackend {
    Redis(RedisClient),
    Store(Arc<dyn LeaseStore>),
}

/// 租约守卫
///
/// Drop 无法执行异步释放，未显式 `release()` 的租约等待 TTL 过期
pub struct LeaseGuard {
    key: String,
    owner: String,
    ttl: Duration,
    backend: LeaseBackend,
    released: bool,
}

impl LeaseGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 将租约有效期重新延长一个 TTL
    ///
    /// 返回 false 表示租约已过期并被其他实例取得，调用方应停止当前批次
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn renew(&self) -> Result<bool> {
        let renewed = match &self.backend {
            LeaseBackend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let extended: i32 = redis::Script::new(RENEW_SCRIPT)
                    .key(format!("lease:{}", self.key))
                    .arg(&self.owner)
                    .arg(self.ttl.as_millis() as u64)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| DropError::Redis(e.to_string()))?;
                extended > 0
            }
            // 同一 owner 再次获取即续期
            LeaseBackend::Store(store) => {
                store.try_acquire(&self.key, &self.owner, self.ttl).await?
            }
        };

        if renewed {
            debug!("租约已续期");
        } else {
            warn!(owner = %self.owner, "租约续期失败，已被其他实例持有");
        }
        Ok(renewed)
    }

    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let released = match &self.backend {
            LeaseBackend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
                    .key(format!("lease:{}", self.key))
                    .arg(&self.owner)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| DropError::Redis(e.to_string()))?;
                deleted > 0
            }
            LeaseBackend::Store(store) => store.release(&self.key, &self.owner).await?,
        };

        if released {
            debug!("租约已释放");
        } else {
            // 通常是批次执行超过了 TTL
            warn!(owner = %self.owner, "租约已过期或被其他实例持有");
        }
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(key = %self.key, owner = %self.owner, "租约守卫未显式释放，将等待 TTL 过期");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryStore, MockLeaseStore};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_store_lease_is_exclusive() {
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryStore::new());
        let first = LeaseManager::new(None, store.clone(), Duration::from_secs(60));
        let second = LeaseManager::new(None, store, Duration::from_secs(60));

        let guard = first.try_acquire(POLL_RUN_LEASE).await.unwrap().unwrap();
        assert!(second.try_acquire(POLL_RUN_LEASE).await.unwrap().is_none());

        assert_ok!(guard.release().await);
        let guard = second.try_acquire(POLL_RUN_LEASE).await.unwrap().unwrap();
        assert_eq!(guard.key(), POLL_RUN_LEASE);
        assert_ok!(guard.release().await);
    }

    #[tokio::test]
    async fn test_renew_keeps_lease_for_owner_only() {
        let store: Arc<dyn LeaseStore> = Arc::new(MemoryStore::new());
        let holder = LeaseManager::new(None, store.clone(), Duration::from_secs(60));
        let other = LeaseManager::new(None, store.clone(), Duration::from_secs(60));

        let guard = holder.try_acquire(POLL_RUN_LEASE).await.unwrap().unwrap();
        assert!(guard.renew().await.unwrap());
        assert!(other.try_acquire(POLL_RUN_LEASE).await.unwrap().is_none());
        assert_ok!(guard.release().await);

        // TTL 为零的租约立即过期，被其他实例取得后原持有者无法续期
        let expiring = LeaseManager::new(None, store, Duration::ZERO);
        let stale = expiring.try_acquire(POLL_RUN_LEASE).await.unwrap().unwrap();
        let taken = other.try_acquire(POLL_RUN_LEASE).await.unwrap().unwrap();
        assert!(!stale.renew().await.unwrap());
        assert_ok!(taken.release().await);
        assert_ok!(stale.release().await);
    }

    #[tokio::test]
    async fn test_owner_is_unique_per_acquire() {
        let mut store = MockLeaseStore::new();
        store.expect_try_acquire().returning(|_, _, _| Ok(true));
        store.expect_release().returning(|_, _| Ok(true));
        let manager = LeaseManager::new(None, Arc::new(store), Duration::from_secs(60));

        let a = manager.try_acquire("k").await.unwrap().unwrap();
        let b = manager.try_acquire("k").await.unwrap().unwrap();
        assert_ne!(a.owner(), b.owner());
        assert!(a.owner().starts_with(&manager.instance_id));
        a.release().await.unwrap();
        b.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let mut store = MockLeaseStore::new();
        store
            .expect_try_acquire()
            .returning(|_, _, _| Err(DropError::Internal("down".to_string())));
        let manager = LeaseManager::new(None, Arc::new(store), Duration::from_secs(60));
        assert_err!(manager.try_acquire("k").await.map(|guard| guard.is_some()));
    }
}
