//! SQLite catalog of editions and pages.
//!
//! The pipeline needs very little from its database: simple selects, plain
//! inserts and deletes, and one conditional update ([`Catalog::try_claim`])
//! that makes "is anyone else processing this edition?" and "I am now
//! processing it" a single atomic step.
//!
//! Every claim bumps the edition's `run_id`. Updates made on behalf of a run
//! carry that number, so a run that was reset out from under it cannot touch
//! the rows of the run that replaced it.
//!
//! The connection sits behind a `Mutex`, so a single `Arc<Catalog>` can be
//! shared by concurrent runs on different editions. Calls block: async code
//! goes through [`Catalog::blocking`], which moves them onto tokio's blocking
//! pool.

use crate::error::EditionError;
use crate::model::{Edition, EditionStatus, NewEdition, Page};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS editions (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        title            TEXT NOT NULL,
        date             TEXT NOT NULL,
        source_pdf_path  TEXT NOT NULL,
        total_pages      INTEGER NOT NULL DEFAULT 0,
        status           TEXT NOT NULL DEFAULT 'draft',
        file_size        INTEGER NOT NULL DEFAULT 0,
        failure_reason   TEXT,
        run_id           INTEGER NOT NULL DEFAULT 0,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pages (
        edition_id   INTEGER NOT NULL,
        page_number  INTEGER NOT NULL,
        image_path   TEXT NOT NULL,
        PRIMARY KEY (edition_id, page_number),
        FOREIGN KEY (edition_id) REFERENCES editions(id)
    );

    CREATE INDEX IF NOT EXISTS idx_editions_status ON editions(status);
";

const EDITION_COLUMNS: &str = "id, title, date, source_pdf_path, total_pages, status, \
                               file_size, failure_reason, created_at, updated_at";

/// Record store for editions and pages.
pub struct Catalog {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Catalog {
    /// Open (or create) the catalog database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EditionError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EditionError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let catalog = Self::init(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "Catalog opened");
        Ok(catalog)
    }

    /// Fresh in-memory catalog.
    pub fn open_in_memory() -> Result<Self, EditionError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, db_path: Option<PathBuf>) -> Result<Self, EditionError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Database file, `None` for in-memory catalogs.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `op` against the catalog on the blocking thread pool.
    pub async fn blocking<T, F>(catalog: &Arc<Catalog>, op: F) -> Result<T, EditionError>
    where
        F: FnOnce(&Catalog) -> Result<T, EditionError> + Send + 'static,
        T: Send + 'static,
    {
        let catalog = Arc::clone(catalog);
        tokio::task::spawn_blocking(move || op(&catalog))
            .await
            .map_err(|e| EditionError::Internal(format!("Catalog task panicked: {}", e)))?
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EditionError> {
        self.conn
            .lock()
            .map_err(|_| EditionError::Internal("catalog connection lock poisoned".into()))
    }

    // ── Editions ─────────────────────────────────────────────────────────

    /// Register a new edition in `draft`.
    pub fn create_edition(&self, new: &NewEdition) -> Result<Edition, EditionError> {
        let now = Utc::now();
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO editions (title, date, source_pdf_path, file_size, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    new.title,
                    new.date,
                    new.source_pdf_path,
                    new.file_size as i64,
                    EditionStatus::Draft,
                    now
                ],
            )?;
            conn.last_insert_rowid()
        };
        debug!(edition_id = id, "Edition created");
        self.get_edition(id)?
            .ok_or(EditionError::EditionNotFound { id })
    }

    pub fn get_edition(&self, id: i64) -> Result<Option<Edition>, EditionError> {
        let conn = self.conn()?;
        let edition = conn
            .query_row(
                &format!("SELECT {EDITION_COLUMNS} FROM editions WHERE id = ?1"),
                params![id],
                edition_from_row,
            )
            .optional()?;
        Ok(edition)
    }

    /// Editions ordered by id, optionally restricted to one status.
    pub fn list_editions(
        &self,
        status: Option<EditionStatus>,
    ) -> Result<Vec<Edition>, EditionError> {
        let conn = self.conn()?;
        let mut editions = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EDITION_COLUMNS} FROM editions WHERE status = ?1 ORDER BY id"
                ))?;
                for edition in stmt.query_map(params![status], edition_from_row)? {
                    editions.push(edition?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {EDITION_COLUMNS} FROM editions ORDER BY id"))?;
                for edition in stmt.query_map([], edition_from_row)? {
                    editions.push(edition?);
                }
            }
        }
        Ok(editions)
    }

    /// Move an edition into `processing` unless it is already there.
    ///
    /// Returns the new run number, or `None` when no row changed: the edition
    /// is missing or another run owns it. The check and the transition are
    /// one statement.
    pub fn try_claim(&self, id: i64) -> Result<Option<i64>, EditionError> {
        let run = self
            .conn()?
            .query_row(
                "UPDATE editions SET status = ?1, failure_reason = NULL, updated_at = ?2,
                        run_id = run_id + 1
                 WHERE id = ?3 AND status <> ?1
                 RETURNING run_id",
                params![EditionStatus::Processing, Utc::now(), id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(run)
    }

    /// Whether `run` still owns the edition.
    pub fn owns_run(&self, id: i64, run: i64) -> Result<bool, EditionError> {
        let owned = self
            .conn()?
            .query_row(
                "SELECT 1 FROM editions WHERE id = ?1 AND status = ?2 AND run_id = ?3",
                params![id, EditionStatus::Processing, run],
                |_| Ok(()),
            )
            .optional()?;
        Ok(owned.is_some())
    }

    /// Record a failed run. Returns `false` if `run` no longer owns the edition.
    pub fn mark_failed(&self, id: i64, run: i64, reason: &str) -> Result<bool, EditionError> {
        let changed = self.conn()?.execute(
            "UPDATE editions SET status = ?1, failure_reason = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5 AND run_id = ?6",
            params![
                EditionStatus::Failed,
                reason,
                Utc::now(),
                id,
                EditionStatus::Processing,
                run
            ],
        )?;
        Ok(changed == 1)
    }

    /// Record a failure found before claiming; leaves an in-flight run untouched.
    ///
    /// Returns `false` if the edition was `processing`.
    pub fn mark_failed_unclaimed(&self, id: i64, reason: &str) -> Result<bool, EditionError> {
        let changed = self.conn()?.execute(
            "UPDATE editions SET status = ?1, failure_reason = ?2, updated_at = ?3
             WHERE id = ?4 AND status <> ?5",
            params![
                EditionStatus::Failed,
                reason,
                Utc::now(),
                id,
                EditionStatus::Processing
            ],
        )?;
        Ok(changed == 1)
    }

    /// Finish a successful run. Returns `false` if `run` no longer owns the edition.
    pub fn mark_ready(&self, id: i64, run: i64, total_pages: u32) -> Result<bool, EditionError> {
        let changed = self.conn()?.execute(
            "UPDATE editions SET status = ?1, total_pages = ?2, failure_reason = NULL, updated_at = ?3
             WHERE id = ?4 AND status = ?5 AND run_id = ?6",
            params![
                EditionStatus::Ready,
                total_pages,
                Utc::now(),
                id,
                EditionStatus::Processing,
                run
            ],
        )?;
        Ok(changed == 1)
    }

    /// Administrative status override. Returns `false` if the edition does not exist.
    pub fn reset_status(
        &self,
        id: i64,
        to: EditionStatus,
        reason: Option<&str>,
    ) -> Result<bool, EditionError> {
        let changed = self.conn()?.execute(
            "UPDATE editions SET status = ?1, failure_reason = ?2, updated_at = ?3 WHERE id = ?4",
            params![to, reason, Utc::now(), id],
        )?;
        Ok(changed == 1)
    }

    // ── Pages ────────────────────────────────────────────────────────────

    /// Insert one page row. A second row for the same key is `DuplicatePage`.
    pub fn insert_page(&self, page: &Page) -> Result<(), EditionError> {
        let result = self.conn()?.execute(
            "INSERT INTO pages (edition_id, page_number, image_path) VALUES (?1, ?2, ?3)",
            params![page.edition_id, page.page_number, page.image_path],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
                    && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) =>
            {
                Err(EditionError::DuplicatePage {
                    edition_id: page.edition_id,
                    page: page.page_number,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every page row of an edition. Returns the number removed.
    pub fn delete_pages(&self, edition_id: i64) -> Result<usize, EditionError> {
        let removed = self
            .conn()?
            .execute("DELETE FROM pages WHERE edition_id = ?1", params![edition_id])?;
        Ok(removed)
    }

    /// Remove the page rows of an edition on behalf of `run`.
    ///
    /// Returns `None`, leaving the rows alone, if `run` no longer owns the edition.
    pub fn delete_pages_for_run(
        &self,
        edition_id: i64,
        run: i64,
    ) -> Result<Option<usize>, EditionError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let owned = tx
            .query_row(
                "SELECT 1 FROM editions WHERE id = ?1 AND status = ?2 AND run_id = ?3",
                params![edition_id, EditionStatus::Processing, run],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !owned {
            return Ok(None);
        }
        let removed = tx.execute("DELETE FROM pages WHERE edition_id = ?1", params![edition_id])?;
        tx.commit()?;
        Ok(Some(removed))
    }

    /// Pages of an edition in page order.
    pub fn pages_for(&self, edition_id: i64) -> Result<Vec<Page>, EditionError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT edition_id, page_number, image_path FROM pages
             WHERE edition_id = ?1 ORDER BY page_number",
        )?;
        let rows = stmt.query_map(params![edition_id], |row| {
            Ok(Page {
                edition_id: row.get(0)?,
                page_number: row.get(1)?,
                image_path: row.get(2)?,
            })
        })?;
        let mut pages = Vec::new();
        for page in rows {
            pages.push(page?);
        }
        Ok(pages)
    }

    pub fn page_count(&self, edition_id: i64) -> Result<u32, EditionError> {
        let count: u32 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM pages WHERE edition_id = ?1",
            params![edition_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("db_path", &self.db_path)
            .finish()
    }
}

fn edition_from_row(row: &Row<'_>) -> rusqlite::Result<Edition> {
    let file_size: i64 = row.get(6)?;
    Ok(Edition {
        id: row.get(0)?,
        title: row.get(1)?,
        date: row.get(2)?,
        source_pdf_path: row.get(3)?,
        total_pages: row.get(4)?,
        status: row.get(5)?,
        file_size: file_size.max(0) as u64,
        failure_reason: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
