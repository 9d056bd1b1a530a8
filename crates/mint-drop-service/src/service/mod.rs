//! 业务服务层

pub mod admin_service;
pub mod code_generator;
pub mod dto;
pub mod eligibility;
pub mod pipeline;

pub use admin_service::AdminService;
pub use dto::*;
pub use eligibility::{Eligibility, EligibilityResolver};
pub use pipeline::DeliveryPipeline;
