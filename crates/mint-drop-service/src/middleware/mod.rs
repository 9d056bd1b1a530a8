//! HTTP 中间件

mod api_key_auth;

pub use api_key_auth::{API_KEY_HEADER, api_key_auth_middleware};
