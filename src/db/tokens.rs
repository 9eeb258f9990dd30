use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

use super::Database;

#[derive(Clone, Debug, PartialEq)]
pub struct StoredToken {
    pub user_id: String,
    pub token: String,
    pub refresh: String,
}

impl Database {
    pub fn upsert_token(&self, user_id: &str, token: &str, refresh: &str) -> Result<()> {
        self.execute(|conn| {
            conn.execute(
                "INSERT INTO tokens (user_id, token, refresh)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id)
                 DO UPDATE SET
                     token = excluded.token,
                     refresh = excluded.refresh",
                params![user_id, token, refresh],
            )
            .context("failed to store token")?;
            Ok(())
        })
    }

    pub fn get_token(&self, user_id: &str) -> Result<Option<StoredToken>> {
        self.execute(|conn| {
            let token = conn
                .query_row(
                    "SELECT user_id, token, refresh FROM tokens WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(StoredToken {
                            user_id: row.get(0)?,
                            token: row.get(1)?,
                            refresh: row.get(2)?,
                        })
                    },
                )
                .optional()
                .context("failed to load token")?;
            Ok(token)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_existing_pair() {
        let db = Database::in_memory().unwrap();

        db.upsert_token("42", "old", "old-refresh").unwrap();
        db.upsert_token("42", "new", "new-refresh").unwrap();

        let token = db.get_token("42").unwrap().unwrap();
        assert_eq!(token.token, "new");
        assert_eq!(token.refresh, "new-refresh");
        assert!(db.get_token("7").unwrap().is_none());
    }
}
