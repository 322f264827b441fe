use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_datetime, parse_datetime, to_i64, to_u64},
    },
    models::{CapturedItem, ReplyRecord},
};

const ITEM_COLUMNS: &str = "item_id, round, author_handle, author_display_name, author_profile_url,
     author_avatar_url, text_content, published_at, search_term_used, commitment_hash,
     reply_json, captured_at";

fn row_to_item(row: &Row) -> Result<CapturedItem> {
    let round: i64 = row.get("round")?;
    let reply_json: Option<String> = row.get("reply_json")?;
    let captured_at: String = row.get("captured_at")?;

    let reply = reply_json
        .map(|raw| serde_json::from_str::<ReplyRecord>(&raw))
        .transpose()
        .context("failed to decode reply_json")?;

    Ok(CapturedItem {
        item_id: row.get("item_id")?,
        author_handle: row.get("author_handle")?,
        author_display_name: row.get("author_display_name")?,
        author_profile_url: row.get("author_profile_url")?,
        author_avatar_url: row.get("author_avatar_url")?,
        text_content: row.get("text_content")?,
        published_at: row.get("published_at")?,
        search_term_used: row.get("search_term_used")?,
        round: to_u64(round, "round")?,
        commitment_hash: row.get("commitment_hash")?,
        reply,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
    })
}

impl Database {
    /// Insert unless the id is already known from any round. Returns whether a
    /// row was written.
    pub async fn insert_captured_item(&self, item: &CapturedItem) -> Result<bool> {
        let record = item.clone();
        self.execute(move |conn| {
            let reply_json = record
                .reply
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO captured_items (item_id, round, author_handle, author_display_name,
                        author_profile_url, author_avatar_url, text_content, published_at,
                        search_term_used, commitment_hash, reply_json, captured_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        record.item_id,
                        to_i64(record.round)?,
                        record.author_handle,
                        record.author_display_name,
                        record.author_profile_url,
                        record.author_avatar_url,
                        record.text_content,
                        record.published_at,
                        record.search_term_used,
                        record.commitment_hash,
                        reply_json,
                        format_datetime(&record.captured_at),
                    ],
                )
                .with_context(|| format!("failed to insert item {}", record.item_id))?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn item_exists(&self, item_id: &str) -> Result<bool> {
        let item_id = item_id.to_string();
        self.execute(move |conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM captured_items WHERE item_id = ?1)",
                params![item_id],
                |row| row.get(0),
            )?;
            Ok(found)
        })
        .await
    }

    pub async fn items_for_round(&self, round: u64) -> Result<Vec<CapturedItem>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM captured_items
                 WHERE round = ?1
                 ORDER BY captured_at ASC"
            ))?;

            let mut rows = stmt.query(params![to_i64(round)?])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_item(row)?);
            }
            Ok(items)
        })
        .await
    }

    pub async fn count_items_for_round(&self, round: u64) -> Result<usize> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM captured_items WHERE round = ?1",
                params![to_i64(round)?],
                |row| row.get(0),
            )?;
            Ok(to_u64(count, "count")? as usize)
        })
        .await
    }

    pub async fn items_captured_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CapturedItem>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM captured_items
                 WHERE captured_at >= ?1 AND captured_at < ?2
                 ORDER BY captured_at ASC"
            ))?;

            let mut rows = stmt.query(params![format_datetime(&start), format_datetime(&end)])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_item(row)?);
            }
            Ok(items)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn item(id: &str, round: u64) -> CapturedItem {
        CapturedItem {
            item_id: id.into(),
            author_handle: "alice".into(),
            author_display_name: "Alice".into(),
            author_profile_url: "https://x.com/alice".into(),
            author_avatar_url: "https://pbs.example/alice.jpg".into(),
            text_content: "hello<br>world".into(),
            published_at: 1_700_000_000,
            search_term_used: "depin".into(),
            round,
            commitment_hash: "$argon2id$stub".into(),
            reply: None,
            captured_at: Utc::now(),
        }
    }

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("node.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn an_item_is_never_recorded_twice_across_rounds() {
        let (_dir, db) = open();

        assert!(db.insert_captured_item(&item("X1", 3)).await.unwrap());
        assert!(!db.insert_captured_item(&item("X1", 4)).await.unwrap());

        assert!(db.item_exists("X1").await.unwrap());
        assert_eq!(db.count_items_for_round(3).await.unwrap(), 1);
        assert_eq!(db.count_items_for_round(4).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reply_records_survive_storage() {
        let (_dir, db) = open();
        let mut with_reply = item("X2", 5);
        with_reply.reply = Some(ReplyRecord {
            reply_id: "R2".into(),
            author_handle: "archivist".into(),
            text: "nice".into(),
            published_at: 1_700_000_100,
        });
        db.insert_captured_item(&with_reply).await.unwrap();
        db.insert_captured_item(&item("X3", 5)).await.unwrap();

        let items = db.items_for_round(5).await.unwrap();
        assert_eq!(items.len(), 2);
        let stored = items.iter().find(|i| i.item_id == "X2").unwrap();
        assert_eq!(stored.reply.as_ref().unwrap().reply_id, "R2");
        assert_eq!(stored.text_content, "hello<br>world");
    }

    #[tokio::test]
    async fn items_can_be_queried_by_capture_time() {
        let (_dir, db) = open();
        let now = Utc::now();
        let mut old = item("OLD", 1);
        old.captured_at = now - Duration::hours(3);
        db.insert_captured_item(&old).await.unwrap();
        db.insert_captured_item(&item("NEW", 2)).await.unwrap();

        let recent = db
            .items_captured_between(now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].item_id, "NEW");
    }
}
