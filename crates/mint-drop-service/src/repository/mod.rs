//! 存储层
//!
//! 提供 PostgreSQL 与内存两套实现，服务层通过 trait 访问。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 暗号消费、链接预留、回复认领都是存储层的单次原子条件写
//! - 发放事务由 `ReservationStore::grant` 在存储层内完成提交或回滚
//! - 定义 trait 接口以支持 mock 测试

mod cursor_repo;
mod delivery_repo;
mod lease_repo;
mod memory;
mod project_repo;
mod reservation_repo;
mod traits;

pub use cursor_repo::CursorRepository;
pub use delivery_repo::DeliveryRepository;
pub use lease_repo::LeaseRepository;
pub use memory::MemoryStore;
pub use project_repo::ProjectRepository;
pub use reservation_repo::ReservationRepository;
pub use traits::*;
