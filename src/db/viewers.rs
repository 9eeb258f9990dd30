use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

use super::Database;

/// Streak after a check-in into `current`, given the viewer's last check-in.
/// Returns `None` when the viewer already checked into `current`.
fn next_streak(last: Option<(i64, i64)>, current: i64, previous: Option<i64>) -> Option<i64> {
    match last {
        Some((last_broadcast, _)) if last_broadcast == current => None,
        Some((last_broadcast, streak)) if Some(last_broadcast) == previous => Some(streak + 1),
        _ => Some(1),
    }
}

impl Database {
    /// Registers the broadcast for `date`, reusing the row if the bot was
    /// already started that day.
    pub fn start_broadcast(&self, date: NaiveDate) -> Result<i64> {
        let stream_date = date.format("%Y-%m-%d").to_string();
        self.execute(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO broadcasts (stream_date) VALUES (?1)",
                params![stream_date],
            )
            .context("failed to register broadcast")?;

            let id = conn
                .query_row(
                    "SELECT id FROM broadcasts WHERE stream_date = ?1",
                    params![stream_date],
                    |row| row.get(0),
                )
                .context("failed to load broadcast")?;
            Ok(id)
        })
    }

    /// Records a check-in and returns the viewer's watch streak.
    pub fn record_checkin(&self, user_id: &str, login: &str, broadcast_id: i64) -> Result<i64> {
        self.execute(|conn| {
            let tx = conn.transaction().context("failed to open check-in transaction")?;

            let previous: Option<i64> = tx
                .query_row(
                    "SELECT MAX(id) FROM broadcasts WHERE id < ?1",
                    params![broadcast_id],
                    |row| row.get(0),
                )
                .context("failed to find previous broadcast")?;

            let last: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT last_broadcast, streak FROM viewers WHERE user_id = ?1",
                    params![user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("failed to load viewer")?;

            let Some(streak) = next_streak(last, broadcast_id, previous) else {
                return Ok(last.map(|(_, streak)| streak).unwrap_or_default());
            };

            tx.execute(
                "INSERT INTO viewers (user_id, login, last_broadcast, streak, total_checkins)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(user_id)
                 DO UPDATE SET
                     login = excluded.login,
                     last_broadcast = excluded.last_broadcast,
                     streak = excluded.streak,
                     total_checkins = total_checkins + 1",
                params![user_id, login, broadcast_id, streak],
            )
            .context("failed to update viewer")?;

            tx.execute(
                "INSERT OR IGNORE INTO checkins (user_id, broadcast_id, checked_in_at)
                 VALUES (?1, ?2, ?3)",
                params![user_id, broadcast_id, Utc::now().to_rfc3339()],
            )
            .context("failed to record check-in")?;

            tx.commit().context("failed to commit check-in")?;
            Ok(streak)
        })
    }

    pub fn total_checkins(&self, user_id: &str) -> Result<i64> {
        self.execute(|conn| {
            let total = conn
                .query_row(
                    "SELECT total_checkins FROM viewers WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to load viewer")?;
            Ok(total.unwrap_or_default())
        })
    }
}
