//! 回复：模板渲染与发送

pub mod dispatcher;
pub mod template;

pub use dispatcher::{ReplyDispatcher, ReplyResult};
pub use template::{MAX_REPLY_CHARS, ReplyContext, TemplateEngine, render, truncate_reply};
