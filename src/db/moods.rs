use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Clone, Debug, PartialEq)]
pub struct MoodCheckRecord {
    pub session_id: String,
    pub mean: f64,
    pub votes: i64,
}

impl Database {
    pub fn record_mood_check(&self, session_id: &str, mean: f64, votes: usize) -> Result<()> {
        let votes = i64::try_from(votes).context("vote count exceeds SQLite INTEGER range")?;
        self.execute(|conn| {
            conn.execute(
                "INSERT INTO mood_checks (session_id, mean, votes, closed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, mean, votes, Utc::now().to_rfc3339()],
            )
            .context("failed to record mood check")?;
            Ok(())
        })
    }

    /// The newest mood check that got at least one vote.
    pub fn last_answered_mood_check(&self) -> Result<Option<MoodCheckRecord>> {
        self.execute(|conn| {
            conn.query_row(
                "SELECT session_id, mean, votes FROM mood_checks
                 WHERE votes > 0
                 ORDER BY closed_at DESC, rowid DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok(MoodCheckRecord {
                        session_id: row.get(0)?,
                        mean: row.get(1)?,
                        votes: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("failed to load last mood check")
        })
    }

    /// Most recent mood checks first.
    #[cfg(test)]
    pub fn recent_mood_checks(&self, limit: usize) -> Result<Vec<MoodCheckRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, mean, votes FROM mood_checks
                 ORDER BY closed_at DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(MoodCheckRecord {
                    session_id: row.get(0)?,
                    mean: row.get(1)?,
                    votes: row.get(2)?,
                })
            })?;

            let mut checks = Vec::new();
            for row in rows {
                checks.push(row?);
            }
            Ok(checks)
        })
    }
}
