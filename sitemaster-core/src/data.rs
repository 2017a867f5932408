use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Result, Transaction, params};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::marks::{Mark, MarkCatalog, MarkDefinition};
use crate::registry::VersionStore;
use crate::scan::{PageScanResult, ScanStore};

/// SQLite-backed storage for scans, the mark catalog and plugin versions.
pub struct Database {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub seed_urls: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPageScan {
    pub id: i64,
    pub scan_id: String,
    pub page_url: String,
    pub depth: u32,
    pub title: Option<String>,
    pub scanned_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMarkUsage {
    pub machine_name: String,
    pub name: String,
    pub plugin: String,
    pub count: u32,
    pub details: Vec<String>,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

impl Database {
    pub fn remove(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Several page passes may write at once
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock().execute_batch(
            "
            -- Site scans, one per run over a set of pages
            CREATE TABLE IF NOT EXISTS scans (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'cancelled')),
    seed_urls TEXT NOT NULL   -- JSON array
);

-- One row per delivered page pass
CREATE TABLE IF NOT EXISTS page_scans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id TEXT NOT NULL,
    page_url TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    title TEXT,
    scanned_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_page_scans_scan ON page_scans(scan_id);
CREATE INDEX IF NOT EXISTS idx_page_scans_url ON page_scans(page_url);

-- Mark catalog
CREATE TABLE IF NOT EXISTS marks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    machine_name TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);

-- Mark occurrences per page pass
CREATE TABLE IF NOT EXISTS mark_usages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_scan_id INTEGER NOT NULL,
    mark_id INTEGER NOT NULL,
    plugin TEXT NOT NULL,
    count INTEGER NOT NULL CHECK(count > 0),
    details TEXT,             -- JSON array

    FOREIGN KEY(page_scan_id) REFERENCES page_scans(id) ON DELETE CASCADE,
    FOREIGN KEY(mark_id) REFERENCES marks(id)
);

CREATE INDEX IF NOT EXISTS idx_mark_usages_page_scan ON mark_usages(page_scan_id);

-- Installed plugin versions
CREATE TABLE IF NOT EXISTS plugin_versions (
    name TEXT PRIMARY KEY,
    version INTEGER NOT NULL
);
            ",
        )?;
        Ok(())
    }

    pub fn get_connection(&self) -> MutexGuard<'_, Connection> {
        self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Scan sessions
    pub fn create_session(&self, seed_urls: &[String]) -> std::result::Result<String, StoreError> {
        let scan_id = uuid::Uuid::new_v4().to_string();
        let seed_urls = serde_json::to_string(seed_urls)?;

        self.lock().execute(
            "INSERT INTO scans (id, start_time, status, seed_urls) VALUES (?1, ?2, ?3, ?4)",
            params![&scan_id, current_timestamp(), "running", seed_urls],
        )?;

        Ok(scan_id)
    }

    pub fn complete_session(&self, scan_id: &str) -> Result<()> {
        self.finish_session(scan_id, "completed")
    }

    pub fn fail_session(&self, scan_id: &str) -> Result<()> {
        self.finish_session(scan_id, "failed")
    }

    fn finish_session(&self, scan_id: &str, status: &str) -> Result<()> {
        self.lock().execute(
            "UPDATE scans SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status, current_timestamp(), scan_id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, scan_id: &str) -> Result<Option<ScanSession>> {
        self.lock()
            .query_row(
                "SELECT id, start_time, end_time, status, seed_urls FROM scans WHERE id = ?1",
                [scan_id],
                |row| {
                    Ok(ScanSession {
                        id: row.get(0)?,
                        start_time: row.get(1)?,
                        end_time: row.get(2)?,
                        status: row.get(3)?,
                        seed_urls: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    // Page scans
    pub fn save_page_scan(&self, result: &PageScanResult) -> std::result::Result<i64, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO page_scans (scan_id, page_url, depth, title, scanned_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &result.scan_id,
                &result.page_url,
                result.depth,
                &result.title,
                result.scanned_at.timestamp(),
            ],
        )?;
        let page_scan_id = tx.last_insert_rowid();

        for recorded in &result.marks {
            if recorded.count == 0 {
                continue;
            }
            // Catalog ids from another store do not apply here
            let mark_id = get_or_create_mark(&tx, &recorded.mark.machine_name)?.id;
            let details = serde_json::to_string(&recorded.details)?;

            tx.execute(
                "INSERT INTO mark_usages (page_scan_id, mark_id, plugin, count, details)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![page_scan_id, mark_id, &recorded.plugin, recorded.count, details],
            )?;
        }

        tx.commit()?;
        Ok(page_scan_id)
    }

    pub fn get_page_scans(&self, scan_id: &str) -> Result<Vec<StoredPageScan>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, scan_id, page_url, depth, title, scanned_at
             FROM page_scans WHERE scan_id = ?1 ORDER BY id",
        )?;

        stmt.query_map([scan_id], |row| {
            Ok(StoredPageScan {
                id: row.get(0)?,
                scan_id: row.get(1)?,
                page_url: row.get(2)?,
                depth: row.get(3)?,
                title: row.get(4)?,
                scanned_at: row.get(5)?,
            })
        })?
        .collect()
    }

    pub fn get_marks_for_page_scan(
        &self,
        page_scan_id: i64,
    ) -> std::result::Result<Vec<StoredMarkUsage>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT m.machine_name, m.name, u.plugin, u.count, u.details
             FROM mark_usages u
             JOIN marks m ON u.mark_id = m.id
             WHERE u.page_scan_id = ?1
             ORDER BY u.id",
        )?;

        let rows = stmt
            .query_map([page_scan_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(machine_name, name, plugin, count, details)| -> std::result::Result<_, StoreError> {
                let details = match details {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                };
                Ok(StoredMarkUsage {
                    machine_name,
                    name,
                    plugin,
                    count,
                    details,
                })
            })
            .collect()
    }

    pub fn get_marks(&self) -> Result<Vec<Mark>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, machine_name, name, description FROM marks ORDER BY id")?;

        stmt.query_map([], mark_from_row)?.collect()
    }
}

fn mark_from_row(row: &rusqlite::Row<'_>) -> Result<Mark> {
    Ok(Mark {
        id: row.get(0)?,
        machine_name: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

fn find_mark(conn: &Connection, machine_name: &str) -> Result<Option<Mark>> {
    conn.query_row(
        "SELECT id, machine_name, name, description FROM marks WHERE machine_name = ?1",
        [machine_name],
        mark_from_row,
    )
    .optional()
}

fn get_or_create_mark(tx: &Transaction<'_>, machine_name: &str) -> Result<Mark> {
    if let Some(mark) = find_mark(tx, machine_name)? {
        return Ok(mark);
    }

    tx.execute(
        "INSERT INTO marks (machine_name, name, description) VALUES (?1, ?1, '')",
        [machine_name],
    )?;

    Ok(Mark {
        id: tx.last_insert_rowid(),
        machine_name: machine_name.to_string(),
        name: machine_name.to_string(),
        description: String::new(),
    })
}

impl ScanStore for Database {
    fn save(&self, result: &PageScanResult) -> std::result::Result<(), StoreError> {
        self.save_page_scan(result).map(|_| ())
    }
}

impl MarkCatalog for Database {
    fn mark(&self, machine_name: &str) -> std::result::Result<Mark, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mark = get_or_create_mark(&tx, machine_name)?;
        tx.commit()?;
        Ok(mark)
    }

    fn define(&self, definition: &MarkDefinition) -> std::result::Result<Mark, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO marks (machine_name, name, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(machine_name) DO UPDATE SET name = excluded.name, description = excluded.description",
            params![&definition.machine_name, &definition.name, &definition.description],
        )?;

        find_mark(&conn, &definition.machine_name)?
            .ok_or_else(|| StoreError::NotFound(definition.machine_name.clone()))
    }
}

impl VersionStore for Database {
    fn installed_versions(&self) -> std::result::Result<HashMap<String, u64>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT name, version FROM plugin_versions")?;

        let versions = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(versions)
    }

    fn set_installed_versions(&self, versions: &HashMap<String, u64>) -> std::result::Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM plugin_versions", [])?;
        for (name, version) in versions {
            tx.execute(
                "INSERT INTO plugin_versions (name, version) VALUES (?1, ?2)",
                params![name, *version as i64],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
