//! 规范化后的社交平台帖子
//!
//! 推送与轮询两条采集通道都先转换为 `SocialPost`，再进入同一条处理管道

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\w+)").expect("hashtag regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialPost {
    pub id: String,
    pub text: String,
    pub author_id: String,
    /// 作者用户名，不含 `@`
    pub author_username: String,
    /// 是否附带 photo 类型的媒体
    pub has_photo: bool,
    pub created_at: DateTime<Utc>,
}

impl SocialPost {
    /// 提取帖子中的全部话题标签（小写、去重）
    pub fn hashtags(&self) -> HashSet<String> {
        HASHTAG_RE
            .captures_iter(&self.text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    /// 帖子 ID 的数值形式（平台 ID 为递增的雪花 ID）
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.parse().ok()
    }
}

/// 比较两个平台 ID：均为数字时按数值比较，否则按长度再按字典序
pub fn compare_post_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// 按创建时间升序排序，时间相同时按 ID 排序
pub fn sort_oldest_first(posts: &mut [SocialPost]) {
    posts.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| compare_post_ids(&a.id, &b.id))
    });
}

#[cfg(test)]
pub(crate) fn sample_post(id: &str, text: &str, has_photo: bool) -> SocialPost {
    SocialPost {
        id: id.to_string(),
        text: text.to_string(),
        author_id: format!("user-{}", id),
        author_username: format!("fan{}", id),
        has_photo,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_extract_hashtags_case_insensitive() {
        let post = sample_post("1", "claim #Drop and #ETH_Denver #drop!", false);
        let tags = post.hashtags();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("drop"));
        assert!(tags.contains("eth_denver"));
    }

    #[test]
    fn test_no_hashtags() {
        let post = sample_post("1", "just a post with # alone", false);
        assert!(post.hashtags().is_empty());
    }

    #[test]
    fn test_compare_post_ids_numerically() {
        assert_eq!(compare_post_ids("9", "10"), Ordering::Less);
        assert_eq!(
            compare_post_ids("1790000000000000001", "1790000000000000000"),
            Ordering::Greater
        );
        assert_eq!(compare_post_ids("5", "5"), Ordering::Equal);
    }

    #[test]
    fn test_sort_oldest_first() {
        let now = Utc::now();
        let mut a = sample_post("30", "a", false);
        a.created_at = now;
        let mut b = sample_post("20", "b", false);
        b.created_at = now - Duration::seconds(10);
        let mut c = sample_post("10", "c", false);
        c.created_at = now;

        let mut posts = vec![a, b, c];
        sort_oldest_first(&mut posts);
        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["20", "10", "30"]);
    }
}
