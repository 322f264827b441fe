use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{parse_datetime, to_i64, to_u64},
    },
    models::ProofRecord,
};

fn row_to_proof(row: &Row) -> Result<ProofRecord> {
    let round: i64 = row.get("round")?;
    let published_at: String = row.get("published_at")?;
    Ok(ProofRecord {
        round: to_u64(round, "round")?,
        content_identifier: row.get("content_identifier")?,
        published_at: parse_datetime(&published_at, "published_at")?,
    })
}

impl Database {
    /// Proofs are write-once per round; a second publish for the same round is ignored.
    pub async fn insert_proof(&self, proof: &ProofRecord) -> Result<bool> {
        let record = proof.clone();
        self.execute(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO proofs (round, content_identifier, published_at)
                     VALUES (?1, ?2, ?3)",
                    params![
                        to_i64(record.round)?,
                        record.content_identifier,
                        record.published_at.to_rfc3339(),
                    ],
                )
                .with_context(|| format!("failed to insert proof for round {}", record.round))?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn get_proof(&self, round: u64) -> Result<Option<ProofRecord>> {
        self.execute(move |conn| {
            let proof = conn
                .query_row(
                    "SELECT round, content_identifier, published_at FROM proofs WHERE round = ?1",
                    params![to_i64(round)?],
                    |row| Ok(row_to_proof(row)),
                )
                .optional()?
                .transpose()?;
            Ok(proof)
        })
        .await
    }
}
