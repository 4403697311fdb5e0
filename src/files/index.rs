use super::paths::PathResolver;
use super::schema::{
    FileMetadata, FileRecord, NormalizeReport, PathUpdate, ReconcileReport, StructureStatus,
};
use super::validate;
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Marker embedded in the names of pre-overwrite backups.
pub const BACKUP_MARKER: &str = ".backup_";

const SELECT_COLUMNS: &str = "id, name, size, upload_date, type, path, structure_ok";

/// SQLite-backed registry of file metadata, one row per unique base name.
///
/// The registry caches the file system; on conflict the disk wins. Every
/// operation opens its own connection.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    db_path: PathBuf,
    resolver: PathResolver,
    allowed_extensions: Vec<String>,
}

impl FileRegistry {
    pub fn open(
        db_path: &Path,
        resolver: PathResolver,
        allowed_extensions: Vec<String>,
    ) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| Error::io_with_path(e, dir))?;
            }
        }
        let registry = Self {
            db_path: db_path.to_path_buf(),
            resolver,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        };
        let conn = registry.connect()?;
        Self::init_schema(&conn)?;
        Ok(registry)
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                name         TEXT NOT NULL UNIQUE,
                size         INTEGER NOT NULL,
                upload_date  TEXT NOT NULL,
                type         TEXT NOT NULL,
                path         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);",
        )?;

        // Databases created before the validity flag existed get it in place.
        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(files)")?
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;
        if !columns.iter().any(|c| c == "structure_ok") {
            info!("Adding structure_ok column to files table");
            conn.execute_batch("ALTER TABLE files ADD COLUMN structure_ok TEXT")?;
        }
        Ok(())
    }

    /// Insert or fully overwrite the row for `meta.name`.
    pub fn upsert(&self, meta: &FileMetadata) -> Result<FileRecord> {
        let conn = self.connect()?;
        let record = conn.query_row(
            &format!(
                "INSERT INTO files (name, size, upload_date, type, path, structure_ok)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    size = excluded.size,
                    upload_date = excluded.upload_date,
                    type = excluded.type,
                    path = excluded.path,
                    structure_ok = excluded.structure_ok
                 RETURNING {SELECT_COLUMNS}"
            ),
            params![
                meta.name,
                meta.size as i64,
                meta.upload_date,
                meta.file_type,
                meta.path,
                meta.structure_ok.as_str(),
            ],
            Self::row_to_record,
        )?;
        Ok(record)
    }

    /// Compute metadata for a file on disk and upsert it.
    pub fn register(&self, path: &Path) -> Result<FileRecord> {
        let meta = self.describe(path)?;
        let record = self.upsert(&meta)?;
        debug!(
            id = record.id,
            name = %record.name,
            path = %record.path,
            structure = record.structure_ok.as_str(),
            "Registered file"
        );
        Ok(record)
    }

    fn describe(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::io_with_path(e, path))?;
        if !metadata.is_file() {
            return Err(Error::NotFound(format!("{} is not a file", path.display())));
        }
        let relative = self.resolver.relative_to_root(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", path.display())))?;
        let file_type = file_type_of(path);
        let modified: DateTime<Utc> = metadata
            .modified()
            .map_err(|e| Error::io_with_path(e, path))?
            .into();
        let structure_ok = if file_type == "json" {
            validate::structure_status(path, Path::new(&relative))
        } else {
            StructureStatus::NotApplicable
        };
        Ok(FileMetadata {
            name,
            size: metadata.len(),
            upload_date: modified.to_rfc3339_opts(SecondsFormat::Secs, true),
            file_type,
            path: relative,
            structure_ok,
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<FileRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM files WHERE id = ?1"),
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<FileRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM files WHERE name = ?1"),
                params![name],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Top-level records without a filter; the folder and everything below
    /// it with one. An empty registry is reconciled from disk first.
    pub fn list(&self, folder: Option<&str>) -> Result<Vec<FileRecord>> {
        let scope = match folder {
            Some(f) => {
                let abs = self.resolver.resolve(f)?;
                Some(self.resolver.relative_to_root(&abs)?)
            }
            None => None,
        };

        if self.count()? == 0 {
            let report = self.reconcile(scope.as_deref())?;
            info!(
                registered = report.registered,
                failed = report.failed.len(),
                "Registry was empty, rebuilt from disk"
            );
        }

        let conn = self.connect()?;
        let records = match scope.as_deref() {
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM files WHERE instr(path, '/') = 0 ORDER BY name"
                ))?;
                let rows = stmt.query_map([], Self::row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some("") => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM files ORDER BY name"))?;
                let rows = stmt.query_map([], Self::row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(prefix) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM files
                     WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
                     ORDER BY path"
                ))?;
                let rows = stmt.query_map(
                    params![prefix, format!("{prefix}/")],
                    Self::row_to_record,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    pub fn all(&self) -> Result<Vec<FileRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM files ORDER BY id"))?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Walk the file system under `scope` (root-relative; `None` is the
    /// whole root), register every file with an allowed extension, then drop
    /// rows in the scope whose file is gone.
    pub fn reconcile(&self, scope: Option<&str>) -> Result<ReconcileReport> {
        let dir = self.resolver.resolve(scope.unwrap_or(""))?;
        let prefix = self.resolver.relative_to_root(&dir)?;
        let mut report = ReconcileReport::default();
        if !dir.is_dir() {
            report.removed = self.prune_missing(&prefix)?;
            return Ok(report);
        }

        for entry in WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if !self.is_tracked(path) {
                continue;
            }
            match self.register(path) {
                Ok(_) => report.registered += 1,
                Err(e) => {
                    warn!("Failed to register {}: {}", path.display(), e);
                    report.failed.push(path.display().to_string());
                }
            }
        }
        report.removed = self.prune_missing(&prefix)?;
        Ok(report)
    }

    /// Remove rows at or below `prefix` that no longer point at a file.
    fn prune_missing(&self, prefix: &str) -> Result<usize> {
        let nested = format!("{prefix}/");
        let mut removed = 0;
        for record in self.all()? {
            let in_scope =
                prefix.is_empty() || record.path == prefix || record.path.starts_with(&nested);
            if !in_scope {
                continue;
            }
            let exists = self
                .resolver
                .locate(&record.path)
                .is_some_and(|p| p.is_file());
            if !exists && self.remove(&record.name)? {
                debug!(name = %record.name, path = %record.path, "Dropped row for missing file");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Allowed extension, not a backup or temp artifact.
    fn is_tracked(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        if name.starts_with('.') || name.contains(BACKUP_MARKER) {
            return false;
        }
        let ext = file_type_of(path);
        self.allowed_extensions.iter().any(|allowed| *allowed == ext)
    }

    /// Delete the row for `name`. The file system is not touched.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let conn = self.connect()?;
        let affected = conn.execute("DELETE FROM files WHERE name = ?1", params![name])?;
        Ok(affected > 0)
    }

    /// Delete every row at or below a root-relative folder.
    pub fn remove_under(&self, folder: &str) -> Result<usize> {
        let conn = self.connect()?;
        let affected = if folder.is_empty() {
            conn.execute("DELETE FROM files", [])?
        } else {
            conn.execute(
                "DELETE FROM files WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
                params![folder, format!("{folder}/")],
            )?
        };
        Ok(affected)
    }

    /// Relocate a record's file into `dest_folder` and re-register it.
    /// An existing file of the same name at the destination is replaced.
    pub fn move_to(&self, record: &FileRecord, dest_folder: &str) -> Result<FileRecord> {
        let src = self.resolver.resolve_stored(&record.path)?;
        if !src.is_file() {
            return Err(Error::NotFound(record.path.clone()));
        }
        let dest_dir = self.resolver.resolve(dest_folder)?;
        std::fs::create_dir_all(&dest_dir).map_err(|e| Error::io_with_path(e, &dest_dir))?;
        let dest = dest_dir.join(&record.name);

        if dest != src {
            if dest.exists() {
                std::fs::remove_file(&dest).map_err(|e| Error::io_with_path(e, &dest))?;
            }
            if let Err(rename_err) = std::fs::rename(&src, &dest) {
                debug!("rename failed ({}), copying instead", rename_err);
                std::fs::copy(&src, &dest).map_err(|e| Error::io_with_path(e, &dest))?;
                std::fs::remove_file(&src).map_err(|e| Error::io_with_path(e, &src))?;
            }
        }

        let moved = self.register(&dest)?;
        info!(name = %moved.name, from = %record.path, to = %moved.path, "Moved file");
        Ok(moved)
    }

    /// Rewrite legacy stored paths into canonical root-relative form.
    pub fn normalize_paths(&self) -> Result<NormalizeReport> {
        let backup = PathBuf::from(format!("{}.normalize.bak", self.db_path.display()));
        if self.db_path.exists() && !backup.exists() {
            std::fs::copy(&self.db_path, &backup).map_err(|e| Error::io_with_path(e, &backup))?;
            info!("Registry backup created at {}", backup.display());
        }

        let mut report = NormalizeReport::default();
        let conn = self.connect()?;
        for record in self.all()? {
            let found = self
                .resolver
                .locate(&record.path)
                .filter(|p| p.is_file())
                .or_else(|| self.find_by_basename(&record.name));
            let Some(found) = found else {
                report.missing.push(record.name);
                continue;
            };
            let canonical = self.resolver.relative_to_root(&found)?;
            if canonical != record.path {
                conn.execute(
                    "UPDATE files SET path = ?1 WHERE id = ?2",
                    params![canonical, record.id],
                )?;
                report.updated.push(PathUpdate {
                    id: record.id,
                    name: record.name,
                    old: record.path,
                    new: canonical,
                });
            }
        }
        Ok(report)
    }

    fn find_by_basename(&self, name: &str) -> Option<PathBuf> {
        WalkDir::new(self.resolver.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == name)
            .map(|e| e.into_path())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        Ok(FileRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            size: row.get::<_, i64>(2)? as u64,
            upload_date: row.get(3)?,
            file_type: row.get(4)?,
            path: row.get(5)?,
            structure_ok: StructureStatus::from_column(row.get::<_, Option<String>>(6)?.as_deref()),
        })
    }
}

/// Lowercase extension without the dot, or `unknown`.
pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
