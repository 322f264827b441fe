use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::db::connection::Database;

impl Database {
    pub async fn kv_get_value(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|text| serde_json::from_str(&text))
                .transpose()
                .with_context(|| format!("kv entry '{key}' is not valid JSON"))
        })
        .await
    }

    pub async fn kv_set_value(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value.to_string(), Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to upsert kv entry '{key}'"))?;
            Ok(())
        })
        .await
    }

    pub async fn kv_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv_get_value(key).await? {
            Some(value) => Ok(Some(
                serde_json::from_value(value)
                    .with_context(|| format!("kv entry '{key}' has an unexpected shape"))?,
            )),
            None => Ok(None),
        }
    }

    pub async fn kv_set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.kv_set_value(key, serde_json::to_value(value)?).await
    }
}
