pub mod audit;
pub mod governor;
pub mod item;
pub mod proof;

pub use audit::{AuditOutcome, AuditReport, AuditVerdict, MismatchReason};
pub use governor::{CooldownState, RuntimeWindow};
pub use item::{CapturedItem, ReplyRecord};
pub use proof::ProofRecord;
