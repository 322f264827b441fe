use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::ParsedItem;

/// Our own reply under a captured post, recorded so auditors can find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRecord {
    pub reply_id: String,
    pub author_handle: String,
    pub text: String,
    /// Unix seconds.
    pub published_at: i64,
}

/// One post captured during a round. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedItem {
    pub item_id: String,
    pub author_handle: String,
    pub author_display_name: String,
    pub author_profile_url: String,
    pub author_avatar_url: String,
    /// Normalised text, the exact string the commitment was made over.
    pub text_content: String,
    /// Unix seconds.
    pub published_at: i64,
    pub search_term_used: String,
    pub round: u64,
    pub commitment_hash: String,
    #[serde(default)]
    pub reply: Option<ReplyRecord>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedItem {
    pub fn from_parsed(
        parsed: ParsedItem,
        text_content: String,
        search_term: &str,
        round: u64,
        commitment_hash: String,
    ) -> Self {
        Self {
            item_id: parsed.item_id,
            author_handle: parsed.author_handle,
            author_display_name: parsed.author_display_name,
            author_profile_url: parsed.author_profile_url,
            author_avatar_url: parsed.author_avatar_url,
            text_content,
            published_at: parsed.published_at,
            search_term_used: search_term.to_string(),
            round,
            commitment_hash,
            reply: None,
            captured_at: Utc::now(),
        }
    }
}
