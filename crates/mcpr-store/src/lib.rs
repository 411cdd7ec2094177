//! Durable state: one SQLite database behind a single-writer mutex.
//!
//! Repositories own their tables; services hold a shared [`Store`] and go
//! through the typed accessors. All writes happen on one connection, so
//! cross-row mutations are transactional by construction.

pub mod audit;
pub mod migrations;
pub mod policies;
pub mod projects;
pub mod servers;
pub mod sql;
pub mod tokens;

pub use audit::{AuditFilter, AuditLog, AuditPage};
pub use policies::PolicyRepo;
pub use projects::{ProjectRecord, ProjectRepo};
pub use servers::ServerRepo;
pub use tokens::TokenRepo;

use mcpr_core::{Result, RouterError};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle to the SQLite database. Cheap to clone; all clones share the
/// same connection and writer lock.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and bring the schema up to
    /// date.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(RouterError::internal)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(RouterError::internal)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(RouterError::internal)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(RouterError::internal)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        migrations::apply_all(&store)?;
        Ok(store)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn servers(&self) -> ServerRepo {
        ServerRepo::new(self.clone())
    }

    pub fn tokens(&self) -> TokenRepo {
        TokenRepo::new(self.clone())
    }

    pub fn policies(&self) -> PolicyRepo {
        PolicyRepo::new(self.clone())
    }

    pub fn audit(&self) -> AuditLog {
        AuditLog::new(self.clone())
    }

    pub fn projects(&self) -> ProjectRepo {
        ProjectRepo::new(self.clone())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("router.db");
        let store = Store::open(&path).unwrap();

        let applied = migrations::applied_names(&store).unwrap();
        assert!(!applied.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("router.db");
        let first = {
            let store = Store::open(&path).unwrap();
            migrations::applied_names(&store).unwrap()
        };
        let second = {
            let store = Store::open(&path).unwrap();
            migrations::applied_names(&store).unwrap()
        };
        assert_eq!(first, second);
    }
}
