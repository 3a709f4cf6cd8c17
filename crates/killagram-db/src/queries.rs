use anyhow::Result;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::SessionRow;

impl Database {
    // -- Sessions --

    pub fn get_session(&self, phone: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT phone, session, account_version, updated_at FROM sessions WHERE phone = ?1",
                    [phone],
                    |row| {
                        let version: i64 = row.get(2)?;
                        Ok(SessionRow {
                            phone: row.get(0)?,
                            session: row.get(1)?,
                            account_version: u64::try_from(version).unwrap_or(1),
                            updated_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Insert or replace the session for `phone`. The account version is kept.
    pub fn upsert_session(&self, phone: &str, session: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (phone, session, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(phone) DO UPDATE SET session = excluded.session, updated_at = excluded.updated_at",
                (phone, session, Utc::now().to_rfc3339()),
            )?;
            Ok(())
        })
    }

    /// Drop the session but keep the row, so the account version survives.
    /// Returns whether a session was cleared.
    pub fn clear_session(&self, phone: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let cleared = conn.execute(
                "UPDATE sessions SET session = NULL, updated_at = ?2
                 WHERE phone = ?1 AND session IS NOT NULL",
                (phone, Utc::now().to_rfc3339()),
            )?;
            Ok(cleared > 0)
        })
    }

    pub fn session_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE session IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // -- Account versions --

    /// Raise the stored version of `phone` to `version`. Never lowers it.
    pub fn raise_account_version(&self, phone: &str, version: u64) -> Result<()> {
        let version = i64::try_from(version)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (phone, session, account_version, updated_at) VALUES (?1, NULL, ?2, ?3)
                 ON CONFLICT(phone) DO UPDATE SET
                    account_version = MAX(account_version, excluded.account_version),
                    updated_at = excluded.updated_at",
                (phone, version, Utc::now().to_rfc3339()),
            )?;
            Ok(())
        })
    }

    /// Users whose version moved past 1.
    pub fn list_account_versions(&self) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT phone, account_version FROM sessions WHERE account_version > 1",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let version: i64 = row.get(1)?;
                    Ok((row.get::<_, String>(0)?, version))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|(phone, v)| u64::try_from(v).ok().map(|v| (phone, v)))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    #[test]
    fn upsert_replaces_and_clear_reports() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session("+1", "a").unwrap();
        db.upsert_session("+1", "b").unwrap();
        db.upsert_session("+2", "c").unwrap();
        assert_eq!(db.session_count().unwrap(), 2);

        let row = db.get_session("+1").unwrap().unwrap();
        assert_eq!(row.phone, "+1");
        assert_eq!(row.session.as_deref(), Some("b"));
        assert_eq!(row.account_version, 1);
        assert!(!row.updated_at.is_empty());

        assert!(db.clear_session("+1").unwrap());
        assert!(!db.clear_session("+1").unwrap());
        assert_eq!(db.session_count().unwrap(), 1);
    }

    #[test]
    fn account_version_only_moves_up() {
        let db = Database::open_in_memory().unwrap();
        db.raise_account_version("+1", 3).unwrap();
        db.raise_account_version("+1", 2).unwrap();
        db.upsert_session("+1", "fresh-login").unwrap();

        let row = db.get_session("+1").unwrap().unwrap();
        assert_eq!(row.account_version, 3);
        assert_eq!(row.session.as_deref(), Some("fresh-login"));
        assert_eq!(db.list_account_versions().unwrap(), vec![("+1".to_string(), 3)]);
    }
}
