//! SQLite storage for durable plugin records
//!
//! 플러그인 설치/활성화 상태만 저장한다. 런타임 설정은 JSON (storage/json/)에서 관리
//!
//! ## Migration System
//!
//! Database schema is versioned. Migrations run automatically on startup.
//! - Version 1: Initial schema (plugins)
//! - Version 2: Index on installed plugins for start-up loading

use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Database file name inside the data directory
pub const PLUGIN_DB_FILE: &str = "plugins.db";

const SELECT_COLUMNS: &str = r#"
    SELECT id, plugin_id, is_installed, is_activated, backup, created_at, updated_at
    FROM plugins
"#;

/// SQLite-backed table of durable plugin records
#[derive(Clone)]
pub struct PluginRecordDb {
    conn: Arc<Mutex<Connection>>,
}

impl PluginRecordDb {
    /// Open (or create) the database under `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join(PLUGIN_DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS plugins (
                id TEXT PRIMARY KEY,
                plugin_id TEXT NOT NULL UNIQUE,
                is_installed INTEGER NOT NULL DEFAULT 1,
                is_activated INTEGER NOT NULL DEFAULT 0,
                backup INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Plugin database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running plugin database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plugins_installed ON plugins(is_installed, plugin_id)",
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to create index: {}", e)))?;
        Ok(())
    }

    // ========================================================================
    // Plugin Record Operations
    // ========================================================================

    /// Insert a new record. Fails if `plugin_id` already exists.
    pub fn insert(&self, record: &PluginRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO plugins (id, plugin_id, is_installed, is_activated, backup, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.id,
                record.plugin_id,
                record.is_installed,
                record.is_activated,
                record.backup,
                record.created_at,
                record.updated_at,
            ],
        )
        .map_err(|e| {
            Error::Storage(format!(
                "Failed to insert plugin record {}: {}",
                record.plugin_id, e
            ))
        })?;

        Ok(())
    }

    /// Get a record by plugin id
    pub fn get(&self, plugin_id: &str) -> Result<Option<PluginRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!("{} WHERE plugin_id = ?1", SELECT_COLUMNS),
            params![plugin_id],
            PluginRecord::from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get plugin record: {}", e)))
    }

    /// All records ordered by creation time
    pub fn list(&self) -> Result<Vec<PluginRecord>> {
        self.query(&format!("{} ORDER BY created_at, plugin_id", SELECT_COLUMNS))
    }

    /// Records with `is_installed = true`
    pub fn list_installed(&self) -> Result<Vec<PluginRecord>> {
        self.query(&format!(
            "{} WHERE is_installed = 1 ORDER BY created_at, plugin_id",
            SELECT_COLUMNS
        ))
    }

    fn query(&self, sql: &str) -> Result<Vec<PluginRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let records = stmt
            .query_map([], PluginRecord::from_row)
            .map_err(|e| Error::Storage(format!("Failed to query plugins: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Update installation/activation flags. `None` keeps the stored value.
    ///
    /// Returns `false` when no record exists for `plugin_id`.
    pub fn update_flags(
        &self,
        plugin_id: &str,
        is_installed: Option<bool>,
        is_activated: Option<bool>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().to_rfc3339();

        let changed = conn
            .execute(
                r#"
                UPDATE plugins SET
                    is_installed = COALESCE(?2, is_installed),
                    is_activated = COALESCE(?3, is_activated),
                    updated_at = ?4
                WHERE plugin_id = ?1
                "#,
                params![plugin_id, is_installed, is_activated, now],
            )
            .map_err(|e| Error::Storage(format!("Failed to update plugin record: {}", e)))?;

        Ok(changed > 0)
    }

    /// Delete a record. Returns `false` when nothing was deleted.
    pub fn delete(&self, plugin_id: &str) -> Result<bool> {
        let conn = self.lock()?;

        let changed = conn
            .execute("DELETE FROM plugins WHERE plugin_id = ?1", params![plugin_id])
            .map_err(|e| Error::Storage(format!("Failed to delete plugin record: {}", e)))?;

        Ok(changed > 0)
    }

    /// Run raw DDL against the same database (plugin-owned tables)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Storage(format!("Failed to execute statement: {}", e)))
    }

    /// Whether a table with this exact name exists
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to inspect schema: {}", e)))?;
        Ok(found.is_some())
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// Durable plugin record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    pub id: String,
    pub plugin_id: String,
    pub is_installed: bool,
    pub is_activated: bool,
    pub backup: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl PluginRecord {
    /// Fresh installed, inactive record with a v4 UUID
    pub fn new(plugin_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plugin_id: plugin_id.into(),
            is_installed: true,
            is_activated: false,
            backup: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn activated(mut self, activated: bool) -> Self {
        self.is_activated = activated;
        self
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            plugin_id: row.get(1)?,
            is_installed: row.get(2)?,
            is_activated: row.get(3)?,
            backup: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let db = PluginRecordDb::in_memory().expect("Failed to create database");

        let record = PluginRecord::new("weather_widget");
        db.insert(&record).expect("Failed to insert record");

        let retrieved = db
            .get("weather_widget")
            .expect("Failed to get record")
            .expect("Record not found");

        assert_eq!(retrieved, record);
        assert!(retrieved.is_installed);
        assert!(!retrieved.is_activated);
        assert!(uuid::Uuid::parse_str(&retrieved.id).is_ok());
    }

    #[test]
    fn test_duplicate_plugin_id_rejected() {
        let db = PluginRecordDb::in_memory().expect("Failed to create database");

        db.insert(&PluginRecord::new("dup")).expect("first insert");
        let err = db.insert(&PluginRecord::new("dup")).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_update_flags() {
        let db = PluginRecordDb::in_memory().expect("Failed to create database");
        db.insert(&PluginRecord::new("p1")).expect("insert");

        assert!(db.update_flags("p1", None, Some(true)).expect("update"));
        let record = db.get("p1").expect("get").expect("exists");
        assert!(record.is_activated);
        assert!(record.is_installed);

        assert!(!db.update_flags("missing", None, Some(true)).expect("update"));
    }

    #[test]
    fn test_list_installed_and_delete() {
        let db = PluginRecordDb::in_memory().expect("Failed to create database");
        db.insert(&PluginRecord::new("a")).expect("insert");
        db.insert(&PluginRecord::new("b")).expect("insert");
        db.update_flags("b", Some(false), None).expect("update");

        let installed: Vec<String> = db
            .list_installed()
            .expect("list")
            .into_iter()
            .map(|r| r.plugin_id)
            .collect();
        assert_eq!(installed, vec!["a".to_string()]);
        assert_eq!(db.list().expect("list").len(), 2);

        assert!(db.delete("a").expect("delete"));
        assert!(!db.delete("a").expect("delete"));
        assert!(db.get("a").expect("get").is_none());
    }

    #[test]
    fn test_schema_version_and_reopen() {
        let dir = tempfile::TempDir::new().expect("tempdir");

        {
            let db = PluginRecordDb::new(dir.path()).expect("open");
            assert_eq!(db.get_schema_version().expect("version"), CURRENT_SCHEMA_VERSION);
            db.insert(&PluginRecord::new("persisted").activated(true))
                .expect("insert");
        }

        let db = PluginRecordDb::new(dir.path()).expect("reopen");
        let record = db.get("persisted").expect("get").expect("exists");
        assert!(record.is_activated);
    }

    #[test]
    fn test_execute_batch_creates_plugin_table() {
        let db = PluginRecordDb::in_memory().expect("Failed to create database");
        assert!(!db.table_exists("blog_posts").expect("inspect"));

        db.execute_batch(r#"CREATE TABLE IF NOT EXISTS "blog_posts" (id TEXT PRIMARY KEY);"#)
            .expect("create");
        assert!(db.table_exists("blog_posts").expect("inspect"));

        db.execute_batch(r#"DROP TABLE IF EXISTS "blog_posts";"#).expect("drop");
        assert!(!db.table_exists("blog_posts").expect("inspect"));
        assert!(db.execute_batch("NOT SQL").is_err());
    }
}
