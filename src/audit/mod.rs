//! Independent verification of a peer's published round.

mod compare;
mod engine;

pub use compare::{compare_original, compare_reply, normalize_reply_text, within_tolerance};
pub use engine::AuditEngine;
