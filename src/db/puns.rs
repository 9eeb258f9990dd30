use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;

use super::Database;

#[derive(Clone, Debug, PartialEq)]
pub struct PunRecord {
    pub pun_id: i64,
    pub rating: f64,
    pub banned: bool,
}

impl Database {
    /// Returns the stored pun, inserting a fresh row first if it's new.
    /// The flag is true when the row was just created.
    pub fn get_or_insert_pun(&self, pun_id: i64) -> Result<(PunRecord, bool)> {
        self.execute(|conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO puns (pun_id, created_at) VALUES (?1, ?2)",
                    params![pun_id, Utc::now().to_rfc3339()],
                )
                .context("failed to insert pun")?;

            let record = conn
                .query_row(
                    "SELECT pun_id, rating, banned FROM puns WHERE pun_id = ?1",
                    params![pun_id],
                    |row| {
                        Ok(PunRecord {
                            pun_id: row.get(0)?,
                            rating: row.get(1)?,
                            banned: row.get(2)?,
                        })
                    },
                )
                .context("failed to load pun")?;

            Ok((record, inserted == 1))
        })
    }

    pub fn update_pun_rating(&self, pun_id: i64, rating: f64) -> Result<()> {
        self.execute(|conn| {
            conn.execute(
                "UPDATE puns SET rating = ?1 WHERE pun_id = ?2",
                params![rating, pun_id],
            )
            .context("failed to update pun rating")?;
            Ok(())
        })
    }

    pub fn ban_pun(&self, pun_id: i64) -> Result<()> {
        self.execute(|conn| {
            conn.execute("UPDATE puns SET banned = 1 WHERE pun_id = ?1", params![pun_id])
                .context("failed to ban pun")?;
            Ok(())
        })
    }
}
