//! A single-session crawl, commit and verify node.
//!
//! Each round the node searches the platform for a configured term, captures
//! new posts, commits to their text with a salted Argon2id hash and publishes
//! the batch to content-addressed storage. Peers audit each other's
//! publications by revisiting the live posts and checking the commitments.
//!
//! The browser, storage network, task runtime, markup parser and reply text
//! generator are collaborators supplied by the embedder through the traits in
//! [`browser`], [`storage`], [`host`], [`extract`] and [`capture`].

pub mod audit;
pub mod browser;
pub mod capture;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod governor;
pub mod host;
pub mod models;
pub mod node;
pub mod platform;
pub mod session;
pub mod storage;
pub mod submission;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::{Credentials, NodeConfig};
pub use db::Database;
pub use error::{NodeError, NodeResult, StorageError};
pub use host::{LocalTaskHost, TaskHost};
pub use models::{AuditOutcome, AuditReport, AuditVerdict, CapturedItem, MismatchReason};
pub use node::{ArchiveNode, Collaborators};
pub use utils::init_logging;
