//! Pure comparisons between what a submitter recorded and what is live.

use crate::{
    extract::ParsedItem,
    fingerprint::Fingerprinter,
    models::{CapturedItem, MismatchReason, ReplyRecord},
    platform::normalize_post_text,
};

/// Whitespace removed, lower-cased. Rendering differences in spacing and
/// capitalisation are not treated as tampering.
pub fn normalize_reply_text(text: &str) -> String {
    text.replace("<br>", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn within_tolerance(recorded: i64, observed: i64, tolerance_secs: i64) -> bool {
    (recorded - observed).abs() <= tolerance_secs
}

/// Compare a recorded reply against the live reply.
pub fn compare_reply(
    recorded: &ReplyRecord,
    live: &ParsedItem,
    tolerance_secs: i64,
) -> Vec<MismatchReason> {
    let mut reasons = Vec::new();

    if normalize_reply_text(&recorded.text) != normalize_reply_text(&live.text) {
        reasons.push(MismatchReason::ReplyTextMismatch {
            reply_id: recorded.reply_id.clone(),
        });
    }
    if !recorded
        .author_handle
        .eq_ignore_ascii_case(live.author_handle.trim_start_matches('@'))
    {
        reasons.push(MismatchReason::ReplyAuthorMismatch {
            expected: recorded.author_handle.clone(),
            found: live.author_handle.clone(),
        });
    }
    if !within_tolerance(recorded.published_at, live.published_at, tolerance_secs) {
        reasons.push(MismatchReason::ReplyTimeOutsideTolerance {
            drift_secs: live.published_at - recorded.published_at,
        });
    }

    reasons
}

/// Compare the recorded original post against the live one and check the
/// commitment over the recorded text.
pub fn compare_original(
    recorded: &CapturedItem,
    live: &ParsedItem,
    round: u64,
    fingerprinter: &Fingerprinter,
) -> Vec<MismatchReason> {
    let mut reasons = Vec::new();

    if normalize_post_text(&live.text) != recorded.text_content {
        reasons.push(MismatchReason::OriginalTextMismatch {
            item_id: recorded.item_id.clone(),
        });
    }
    if !fingerprinter.verify(&recorded.text_content, round, &recorded.commitment_hash) {
        reasons.push(MismatchReason::HashMismatch {
            item_id: recorded.item_id.clone(),
        });
    }

    reasons
}
