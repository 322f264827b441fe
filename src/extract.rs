use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Fields lifted out of one rendered post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedItem {
    pub item_id: String,
    pub author_handle: String,
    pub author_display_name: String,
    pub author_profile_url: String,
    pub author_avatar_url: String,
    /// Raw rendered text, newlines intact.
    pub text: String,
    /// Unix seconds.
    pub published_at: i64,
}

/// Markup in, structured record out. The only place that knows what a
/// rendered post looks like.
pub trait Extractor: Send + Sync {
    fn parse_item(&self, markup: &str) -> Result<ParsedItem>;
}
