use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};

use crate::{
    db::Database,
    host::TaskHost,
    models::{CapturedItem, ProofRecord},
    storage::BlobStorage,
};

/// Publishes a round's captured items and records the resulting proof.
pub struct SubmissionBuilder {
    db: Database,
    storage: Arc<dyn BlobStorage>,
    host: Arc<dyn TaskHost>,
    file_name: String,
}

impl SubmissionBuilder {
    pub fn new(
        db: Database,
        storage: Arc<dyn BlobStorage>,
        host: Arc<dyn TaskHost>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            db,
            storage,
            host,
            file_name: file_name.into(),
        }
    }

    /// Content identifier recorded as the round's proof, or `None` when there
    /// was nothing to publish or the upload failed. A round that already has
    /// a proof is not uploaded again. Uploads are not retried.
    pub async fn publish(&self, round: u64) -> Option<String> {
        match self.try_publish(round).await {
            Ok(cid) => cid,
            Err(err) => {
                error!("round {round}: submission failed: {err:#}");
                None
            }
        }
    }

    async fn try_publish(&self, round: u64) -> Result<Option<String>> {
        if let Some(proof) = self.db.get_proof(round).await? {
            info!(
                "round {round}: already published as {}",
                proof.content_identifier
            );
            return Ok(Some(proof.content_identifier));
        }

        let items = self.db.items_for_round(round).await?;
        if items.is_empty() {
            info!("round {round}: nothing captured, skipping submission");
            return Ok(None);
        }

        let path = self.write_blob(&items).await?;
        let cid = self
            .storage
            .upload_file(&path, self.host.submitter_identity())
            .await
            .with_context(|| format!("upload of {} failed", path.display()))?;

        let proof = ProofRecord {
            round,
            content_identifier: cid.clone(),
            published_at: Utc::now(),
        };
        if !self.db.insert_proof(&proof).await? {
            let recorded = self
                .db
                .get_proof(round)
                .await?
                .map(|proof| proof.content_identifier);
            warn!("round {round}: a proof was recorded concurrently, discarding upload {cid}");
            return Ok(recorded);
        }

        info!("round {round}: published {} items as {cid}", items.len());
        Ok(Some(cid))
    }

    async fn write_blob(&self, items: &[CapturedItem]) -> Result<std::path::PathBuf> {
        let dir = self.host.base_path().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = dir.join(&self.file_name);
        let payload = serde_json::to_vec(items)?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use crate::{fingerprint::light_fingerprinter, host::LocalTaskHost, testing::FakeStorage};

    use super::*;

    fn item(id: &str, round: u64) -> CapturedItem {
        let text = format!("post {id}");
        let hash = light_fingerprinter().commit(&text, round).unwrap();
        CapturedItem {
            item_id: id.into(),
            author_handle: "alice".into(),
            author_display_name: "Alice".into(),
            author_profile_url: "https://x.com/alice".into(),
            author_avatar_url: String::new(),
            text_content: text,
            published_at: 1_700_000_000,
            search_term_used: "depin".into(),
            round,
            commitment_hash: hash,
            reply: None,
            captured_at: Utc::now(),
        }
    }

    fn builder(dir: &std::path::Path) -> (SubmissionBuilder, Database, Arc<FakeStorage>) {
        let db = Database::new(dir.join("node.sqlite3")).unwrap();
        let storage = Arc::new(FakeStorage::default());
        let host = Arc::new(LocalTaskHost::new(db.clone(), dir.join("task"), "node-key"));
        let builder = SubmissionBuilder::new(db.clone(), storage.clone(), host, "dataList.json");
        (builder, db, storage)
    }

    #[tokio::test]
    async fn empty_round_is_not_published() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, db, _storage) = builder(dir.path());

        assert_eq!(builder.publish(2).await, None);
        assert!(db.get_proof(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn published_round_records_a_proof() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, db, storage) = builder(dir.path());
        db.insert_captured_item(&item("X1", 2)).await.unwrap();
        db.insert_captured_item(&item("X2", 2)).await.unwrap();
        db.insert_captured_item(&item("X3", 3)).await.unwrap();

        let cid = builder.publish(2).await.unwrap();
        assert_eq!(cid, "cidA");

        let proof = db.get_proof(2).await.unwrap().unwrap();
        assert_eq!(proof.content_identifier, cid);

        let blob: Vec<CapturedItem> = serde_json::from_slice(&storage.blob(&cid).unwrap()).unwrap();
        let mut ids: Vec<_> = blob.iter().map(|item| item.item_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["X1", "X2"]);
        assert!(dir.path().join("task").join("dataList.json").exists());
    }

    #[tokio::test]
    async fn failed_upload_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, db, storage) = builder(dir.path());
        db.insert_captured_item(&item("X1", 2)).await.unwrap();
        storage.fail_uploads.store(true, Ordering::SeqCst);

        assert_eq!(builder.publish(2).await, None);
        assert!(db.get_proof(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn republishing_a_round_returns_the_recorded_proof() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, db, storage) = builder(dir.path());
        db.insert_captured_item(&item("X1", 2)).await.unwrap();

        let first = builder.publish(2).await.unwrap();
        let second = builder.publish(2).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(db.get_proof(2).await.unwrap().unwrap().content_identifier, first);
        assert!(storage.blob("cidB").is_none());
    }

    #[tokio::test]
    async fn existing_proof_is_returned_without_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, db, storage) = builder(dir.path());
        db.insert_captured_item(&item("X1", 2)).await.unwrap();

        let earlier = ProofRecord {
            round: 2,
            content_identifier: "cidQ".into(),
            published_at: Utc::now(),
        };
        let late = ProofRecord {
            content_identifier: "cidR".into(),
            ..earlier.clone()
        };
        assert!(db.insert_proof(&earlier).await.unwrap());
        assert!(!db.insert_proof(&late).await.unwrap());

        assert_eq!(builder.publish(2).await.as_deref(), Some("cidQ"));
        assert!(storage.blob("cidA").is_none());
    }
}
