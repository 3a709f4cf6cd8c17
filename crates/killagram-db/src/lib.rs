pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use killagram_provider::{Credential, CredentialStore};

/// Durable storage for provider session blobs and account versions.
/// Everything else the backend knows lives in memory.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}

impl CredentialStore for Database {
    fn load(&self, user: &str) -> Result<Option<Credential>> {
        Ok(self
            .get_session(user)?
            .and_then(|row| row.session)
            .map(|session| Credential { session }))
    }

    fn save(&self, user: &str, credential: &Credential) -> Result<()> {
        self.upsert_session(user, &credential.session)
    }

    fn delete(&self, user: &str) -> Result<()> {
        self.clear_session(user)?;
        Ok(())
    }

    fn account_versions(&self) -> Result<Vec<(String, u64)>> {
        self.list_account_versions()
    }

    fn save_account_version(&self, user: &str, version: u64) -> Result<()> {
        self.raise_account_version(user, version)
    }
}
