//! Decentralized blob storage collaborator.
//!
//! Submissions are uploaded as a single file and addressed by the content
//! identifier (CID) the network returns. The network client itself lives
//! outside the crate behind [`BlobStorage`].

use std::{path::Path, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use log::warn;

use crate::{error::StorageError, models::CapturedItem};

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const CID_V0_LEN: usize = 46;
const CID_V1_MIN_LEN: usize = 50;

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Upload a local file and return its content identifier.
    async fn upload_file(&self, path: &Path, submitter: &str) -> Result<String>;

    async fn get_file(&self, cid: &str, file_name: &str) -> Result<Vec<u8>>;

    /// Checked before any network call.
    fn validate_identifier(&self, cid: &str) -> Result<(), StorageError> {
        validate_cid(cid)
    }
}

/// Accepts CIDv0 (`Qm…`, base58btc, 46 chars) and CIDv1 in base32 multibase (`b…`).
pub fn validate_cid(cid: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidIdentifier(cid.to_string());

    if cid.starts_with("Qm") {
        if cid.len() == CID_V0_LEN && cid.chars().all(|c| BASE58_ALPHABET.contains(c)) {
            return Ok(());
        }
        return Err(invalid());
    }

    if let Some(body) = cid.strip_prefix('b') {
        if cid.len() >= CID_V1_MIN_LEN
            && body
                .chars()
                .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c))
        {
            return Ok(());
        }
    }

    Err(invalid())
}

/// Fetch and decode a peer's submission, retrying with a fixed backoff.
pub async fn fetch_submission(
    storage: &dyn BlobStorage,
    cid: &str,
    file_name: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<Vec<CapturedItem>, StorageError> {
    storage.validate_identifier(cid)?;

    let attempts = attempts.max(1);
    let mut bytes = None;
    for attempt in 1..=attempts {
        match storage.get_file(cid, file_name).await {
            Ok(data) => {
                bytes = Some(data);
                break;
            }
            Err(err) => {
                warn!("Fetching {cid} failed (attempt {attempt}/{attempts}): {err:#}");
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    let Some(bytes) = bytes else {
        return Err(StorageError::Exhausted {
            cid: cid.to_string(),
            attempts,
        });
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&bytes).map_err(|err| StorageError::Decode {
        cid: cid.to_string(),
        reason: err.to_string(),
    })
}
