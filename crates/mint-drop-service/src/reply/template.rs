//! 回复模板引擎
//!
//! 占位符采用字面替换，不是通用模板语言：
//!
//! - `{username}`：作者用户名，带 `@`
//! - `{claim_url}`：领取链接
//! - `{hashtag}`：项目话题标签，带 `#`
//! - `{project}`：项目名称
//!
//! ## 使用示例
//!
//! ```ignore
//! let engine = TemplateEngine::with_defaults();
//! let context = ReplyContext::new("alice", &project).with_claim_url("https://poap.xyz/claim/abc");
//! let text = engine.render_for(&project, TemplateKind::Eligible, &context);
//! ```

use std::collections::HashMap;

use crate::models::{Project, TemplateKind};

/// 平台单条帖子的长度上限（按 Unicode 字符计）
pub const MAX_REPLY_CHARS: usize = 280;

const ELLIPSIS: &str = "...";

/// 渲染上下文
#[derive(Debug, Clone, Default)]
pub struct ReplyContext {
    pub username: String,
    pub claim_url: String,
    pub hashtag: String,
    pub project: String,
}

impl ReplyContext {
    pub fn new(username: &str, project: &Project) -> Self {
        Self {
            username: format!("@{}", username.trim_start_matches('@')),
            claim_url: String::new(),
            hashtag: format!("#{}", project.normalized_hashtag()),
            project: project.name.clone(),
        }
    }

    pub fn with_claim_url(mut self, claim_url: impl Into<String>) -> Self {
        self.claim_url = claim_url.into();
        self
    }
}

/// 模板引擎
///
/// 持有四类默认模板；项目自身配置的模板总是优先
pub struct TemplateEngine {
    defaults: HashMap<TemplateKind, String>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TemplateEngine {
    /// 创建带有默认模板的引擎
    pub fn with_defaults() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(
            TemplateKind::Eligible,
            "{username} you're in! Claim your {project} collectible here: {claim_url}".to_string(),
        );
        defaults.insert(
            TemplateKind::NotEligible,
            "{username} sorry, this post doesn't meet the {hashtag} requirements. Check the rules and try again!"
                .to_string(),
        );
        defaults.insert(
            TemplateKind::AlreadyClaimed,
            "{username} looks like you've already claimed your {project} collectible.".to_string(),
        );
        defaults.insert(
            TemplateKind::NoLinksAvailable,
            "{username} sorry, all {project} collectibles have been claimed!".to_string(),
        );
        Self { defaults }
    }

    /// 覆盖某类默认模板
    pub fn register_default(&mut self, kind: TemplateKind, template: impl Into<String>) {
        self.defaults.insert(kind, template.into());
    }

    /// 解析模板：项目模板优先，缺失时回退到默认模板
    pub fn resolve<'a>(&'a self, project: &'a Project, kind: TemplateKind) -> &'a str {
        project
            .template(kind)
            .or_else(|| self.defaults.get(&kind).map(String::as_str))
            .unwrap_or_default()
    }

    /// 渲染并截断到平台长度上限
    pub fn render_for(&self, project: &Project, kind: TemplateKind, context: &ReplyContext) -> String {
        truncate_reply(&render(self.resolve(project, kind), context))
    }
}

/// 字面替换占位符
pub fn render(template: &str, context: &ReplyContext) -> String {
    template
        .replace("{username}", &context.username)
        .replace("{claim_url}", &context.claim_url)
        .replace("{hashtag}", &context.hashtag)
        .replace("{project}", &context.project)
}

/// 超过上限时截断到 上限-3 个字符并追加省略号，否则原样返回
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }
    let keep = MAX_REPLY_CHARS - ELLIPSIS.len();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}
