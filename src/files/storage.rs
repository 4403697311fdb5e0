use super::atomic::{write_atomic, write_atomic_with, write_json_atomic};
use super::index::{file_type_of, FileRegistry, BACKUP_MARKER};
use super::paths::PathResolver;
use super::schema::{
    FileRecord, FileRef, FixMode, FixOutcome, FolderDeletion, FolderEntry, MoveFailure, MoveReport,
};
use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

/// What a read returns, by file type.
#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    /// Parsed JSON document.
    Json(Value),
    /// Opaque bytes served as a download.
    Download { name: String, bytes: Vec<u8> },
    /// Binary formats that are never served raw.
    Message { name: String, message: String },
}

/// Content service: file I/O beneath the storage root, kept in step with
/// the registry.
#[derive(Debug, Clone)]
pub struct FileStore {
    resolver: PathResolver,
    registry: FileRegistry,
    discussion_file: String,
}

impl FileStore {
    pub fn new(config: &Config) -> Result<Self> {
        let root = config.storage_root();
        std::fs::create_dir_all(&root).map_err(|e| Error::io_with_path(e, &root))?;
        let resolver = PathResolver::new(root, config.base_dir.clone());
        let registry = FileRegistry::open(
            &config.database_path(),
            resolver.clone(),
            config.allowed_extensions.clone(),
        )?;
        Ok(Self {
            resolver,
            registry,
            discussion_file: config.discussion_file.clone(),
        })
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    fn record(&self, id: i64) -> Result<FileRecord> {
        self.registry
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("file id {}", id)))
    }

    fn record_path(&self, record: &FileRecord) -> Result<PathBuf> {
        self.resolver.resolve_stored(&record.path)
    }

    // ---- reads ----

    pub async fn read(&self, rel_path: &str) -> Result<FileContent> {
        let path = self.resolver.resolve(rel_path)?;
        self.read_path(&path).await
    }

    pub async fn read_by_id(&self, id: i64) -> Result<FileContent> {
        let record = self.record(id)?;
        let path = self.record_path(&record)?;
        self.read_path(&path).await
    }

    async fn read_path(&self, path: &Path) -> Result<FileContent> {
        if !path.is_file() {
            return Err(Error::NotFound(self.display(path)));
        }
        let name = file_name(path)?;
        match file_type_of(path).as_str() {
            "json" => {
                let bytes = fs::read(path).await.map_err(|e| Error::io_with_path(e, path))?;
                let value = serde_json::from_slice(&bytes).map_err(|e| Error::Json {
                    message: format!("Failed to parse {}: {}", name, e),
                    source: Some(e),
                })?;
                Ok(FileContent::Json(value))
            }
            "pkl" => Ok(FileContent::Message {
                message: format!(
                    "{} is a pickle file; its binary content is not served",
                    name
                ),
                name,
            }),
            _ => {
                let bytes = fs::read(path).await.map_err(|e| Error::io_with_path(e, path))?;
                Ok(FileContent::Download { name, bytes })
            }
        }
    }

    /// Read a JSON document or fail with `UnsupportedMedia`.
    pub async fn read_json(&self, rel_path: &str) -> Result<Value> {
        match self.read(rel_path).await? {
            FileContent::Json(value) => Ok(value),
            _ => Err(Error::UnsupportedMedia(format!("{} is not a JSON file", rel_path))),
        }
    }

    pub async fn read_json_by_id(&self, id: i64) -> Result<Value> {
        match self.read_by_id(id).await? {
            FileContent::Json(value) => Ok(value),
            _ => Err(Error::UnsupportedMedia(format!("file id {} is not JSON", id))),
        }
    }

    /// The configured default discussion document.
    pub async fn discussion(&self) -> Result<Value> {
        self.read_json(&self.discussion_file).await
    }

    /// The `users` list of a tree or draft document, or the document itself
    /// when it is already a list.
    pub async fn users(&self, rel_path: &str) -> Result<Value> {
        match self.read_json(rel_path).await? {
            Value::Array(list) => Ok(Value::Array(list)),
            Value::Object(mut obj) => match obj.remove("users") {
                Some(users @ Value::Array(_)) => Ok(users),
                _ => Err(Error::NotFound(format!("{} has no users list", rel_path))),
            },
            _ => Err(Error::NotFound(format!("{} has no users list", rel_path))),
        }
    }

    // ---- writes ----

    /// Atomically replace an existing JSON file.
    pub async fn write_json(&self, rel_path: &str, value: &Value) -> Result<FileRecord> {
        let path = self.resolver.resolve(rel_path)?;
        self.overwrite_json(&path, value).await
    }

    pub async fn write_json_by_id(&self, id: i64, value: &Value) -> Result<FileRecord> {
        let record = self.record(id)?;
        let path = self.record_path(&record)?;
        self.overwrite_json(&path, value).await
    }

    async fn overwrite_json(&self, path: &Path, value: &Value) -> Result<FileRecord> {
        ensure_json(path)?;
        if !path.is_file() {
            return Err(Error::NotFound(self.display(path)));
        }
        write_json_atomic(path, value).await?;
        let record = self.registry.register(path)?;
        info!(id = record.id, path = %record.path, "Updated JSON file");
        Ok(record)
    }

    /// Create (or replace) a JSON file from a draft payload.
    pub async fn save_draft(&self, rel_path: &str, payload: &Value) -> Result<FileRecord> {
        let path = self.resolver.resolve(rel_path)?;
        ensure_json(&path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(e, parent))?;
        }
        write_json_atomic(&path, payload).await?;
        let record = self.registry.register(&path)?;
        info!(id = record.id, path = %record.path, "Saved draft");
        Ok(record)
    }

    /// Store uploaded bytes under `folder` (root when `None`).
    pub async fn upload(
        &self,
        filename: &str,
        folder: Option<&str>,
        data: &[u8],
    ) -> Result<FileRecord> {
        validate_upload_name(filename)?;
        let dir = self.resolver.resolve(folder.unwrap_or(""))?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io_with_path(e, &dir))?;
        let path = dir.join(filename);
        write_atomic(&path, data).await?;
        let record = self.registry.register(&path)?;
        info!(id = record.id, path = %record.path, size = record.size, "Uploaded file");
        Ok(record)
    }

    // ---- deletes ----

    pub async fn delete(&self, rel_path: &str) -> Result<String> {
        let path = self.resolver.resolve(rel_path)?;
        if !path.is_file() {
            return Err(Error::NotFound(rel_path.to_string()));
        }
        let name = file_name(&path)?;
        let relative = self.resolver.relative_to_root(&path)?;
        // The row is keyed by name and may track a same-named file elsewhere.
        let tracked = self.registry.get_by_name(&name)?.map(|record| {
            let same = record.path == relative
                || self.resolver.locate(&record.path).as_deref() == Some(path.as_path());
            (record, same)
        });
        fs::remove_file(&path)
            .await
            .map_err(|e| Error::io_with_path(e, &path))?;
        match tracked {
            Some((_, true)) => {
                self.registry.remove(&name)?;
            }
            Some((record, false)) => {
                debug!(path = %relative, tracked = %record.path, "Row tracks another file, keeping it");
            }
            None => {}
        }
        info!(path = %relative, "Deleted file");
        Ok(name)
    }

    /// Delete by id. A row whose file is already gone is still removed.
    pub async fn delete_by_id(&self, id: i64) -> Result<String> {
        let record = self.record(id)?;
        let path = self.record_path(&record)?;
        if path.is_file() {
            fs::remove_file(&path)
                .await
                .map_err(|e| Error::io_with_path(e, &path))?;
        } else {
            warn!(id, path = %record.path, "File already missing on disk, dropping row");
        }
        self.registry.remove(&record.name)?;
        Ok(record.name)
    }

    /// Remove a backup created by an overwriting fix.
    pub async fn delete_backup(&self, rel_path: &str) -> Result<()> {
        let path = self.resolver.resolve(rel_path)?;
        let name = file_name(&path)?;
        if !name.contains(BACKUP_MARKER) {
            return Err(Error::MalformedInput(format!("{} is not a backup file", rel_path)));
        }
        if !path.is_file() {
            return Err(Error::NotFound(rel_path.to_string()));
        }
        fs::remove_file(&path)
            .await
            .map_err(|e| Error::io_with_path(e, &path))?;
        info!(path = rel_path, "Deleted backup");
        Ok(())
    }

    // ---- moves ----

    pub fn move_files(&self, refs: &[FileRef], destination: &str) -> Result<MoveReport> {
        if refs.is_empty() {
            return Err(Error::MalformedInput("no files to move".to_string()));
        }
        // Validate the destination once so a bad folder fails the whole batch.
        self.resolver.resolve(destination)?;

        let mut report = MoveReport::default();
        for file_ref in refs {
            match self.lookup(file_ref).and_then(|r| self.registry.move_to(&r, destination)) {
                Ok(record) => report.moved.push(record),
                Err(e) => {
                    warn!("Move of {} failed: {}", file_ref, e);
                    report.failed.push(MoveFailure {
                        reference: file_ref.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    fn lookup(&self, file_ref: &FileRef) -> Result<FileRecord> {
        match file_ref {
            FileRef::Id(id) => self.record(*id),
            FileRef::Name(name) => self
                .registry
                .get_by_name(name)?
                .ok_or_else(|| Error::NotFound(name.clone())),
            FileRef::Path(rel) => {
                let path = self.resolver.resolve(rel)?;
                self.registry.register(&path)
            }
        }
    }

    // ---- folders ----

    pub async fn list_folders(&self, rel_path: Option<&str>) -> Result<Vec<FolderEntry>> {
        let dir = self.resolver.resolve(rel_path.unwrap_or(""))?;
        if !dir.is_dir() {
            return Err(Error::NotFound(self.display(&dir)));
        }
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| Error::io_with_path(e, &dir))?;
        let mut folders = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let path = entry.path();
                folders.push(FolderEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: self.resolver.relative_to_root(&path)?,
                });
            }
        }
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    pub async fn create_folder(&self, rel_path: &str) -> Result<FolderEntry> {
        let dir = self.resolver.resolve(rel_path)?;
        if dir == self.resolver.root() {
            return Err(Error::InvalidPath("folder path is empty".to_string()));
        }
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io_with_path(e, &dir))?;
        Ok(FolderEntry {
            name: file_name(&dir)?,
            path: self.resolver.relative_to_root(&dir)?,
        })
    }

    /// Recursively delete a folder and purge the registry rows beneath it.
    pub async fn delete_folder(&self, rel_path: &str) -> Result<FolderDeletion> {
        let dir = self.resolver.resolve(rel_path)?;
        if dir == self.resolver.root() {
            return Err(Error::InvalidPath("refusing to delete the storage root".to_string()));
        }
        if !dir.is_dir() {
            return Err(Error::NotFound(rel_path.to_string()));
        }
        let relative = self.resolver.relative_to_root(&dir)?;
        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| Error::io_with_path(e, &dir))?;
        let removed = self.registry.remove_under(&relative)?;
        info!(path = %relative, db_files_removed = removed, "Deleted folder");
        Ok(FolderDeletion {
            path: relative,
            db_files_removed: removed,
        })
    }

    // ---- LLM fixes ----

    /// Write an LLM-produced replacement for a registered JSON file.
    pub async fn apply_fix(&self, id: i64, fixed: &Value, mode: FixMode) -> Result<FixOutcome> {
        self.apply_fix_with(id, fixed, mode, |_| Ok(())).await
    }

    /// `before_rename` is handed to the in-place write; an error from it
    /// fails the write and triggers the restore from backup.
    pub(crate) async fn apply_fix_with<F>(
        &self,
        id: i64,
        fixed: &Value,
        mode: FixMode,
        before_rename: F,
    ) -> Result<FixOutcome>
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        let original = self.record(id)?;
        let path = self.record_path(&original)?;
        ensure_json(&path)?;
        if !path.is_file() {
            return Err(Error::NotFound(original.path));
        }

        match mode {
            FixMode::NewFile => {
                let target = fix_sibling(&path)?;
                write_json_atomic(&target, fixed).await?;
                let record = self.registry.register(&target)?;
                info!(from = %original.path, to = %record.path, "Wrote fix as new file");
                Ok(FixOutcome {
                    record,
                    mode,
                    backup: None,
                })
            }
            FixMode::Overwrite => {
                let backup = backup_path(&path)?;
                fs::copy(&path, &backup)
                    .await
                    .map_err(|e| Error::io_with_path(e, &backup))?;

                let serialized = serde_json::to_vec_pretty(fixed)?;
                if let Err(e) = write_atomic_with(&path, &serialized, before_rename).await {
                    warn!("Fix write failed for {}, restoring backup: {}", original.path, e);
                    if let Err(restore) = fs::copy(&backup, &path).await {
                        error!("Failed to restore {} from backup: {}", path.display(), restore);
                    }
                    return Err(e);
                }

                let record = self.registry.register(&path)?;
                let backup = self.resolver.relative_to_root(&backup)?;
                info!(path = %record.path, backup = %backup, "Applied fix in place");
                Ok(FixOutcome {
                    record,
                    mode,
                    backup: Some(backup),
                })
            }
        }
    }

    fn display(&self, path: &Path) -> String {
        self.resolver
            .relative_to_root(path)
            .unwrap_or_else(|_| path.display().to_string())
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", path.display())))
}

fn ensure_json(path: &Path) -> Result<()> {
    if file_type_of(path) == "json" {
        Ok(())
    } else {
        Err(Error::UnsupportedMedia(format!(
            "{} is not a JSON file",
            path.file_name().unwrap_or_default().to_string_lossy()
        )))
    }
}

fn validate_upload_name(filename: &str) -> Result<()> {
    if filename.trim().is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(Error::InvalidPath(format!("invalid upload filename: {:?}", filename)));
    }
    Ok(())
}

fn stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", path.display())))
}

/// `<stem>_fix.json`, then `_fix_2`, `_fix_3`, ... until one is free.
fn fix_sibling(path: &Path) -> Result<PathBuf> {
    let stem = stem(path)?;
    let dir = path.parent().unwrap_or(Path::new(""));
    let mut candidate = dir.join(format!("{}_fix.json", stem));
    let mut n = 2;
    while candidate.exists() {
        candidate = dir.join(format!("{}_fix_{}.json", stem, n));
        n += 1;
    }
    Ok(candidate)
}

/// `<stem>.backup_<stamp>.json`, then `_2`, `_3`, ... when a backup from the
/// same second already exists.
fn backup_path(path: &Path) -> Result<PathBuf> {
    let stem = stem(path)?;
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut candidate = path.with_file_name(format!("{}{}{}.json", stem, BACKUP_MARKER, stamp));
    let mut n = 2;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{}{}{}_{}.json", stem, BACKUP_MARKER, stamp, n));
        n += 1;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::schema::StructureStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let temp = TempDir::new().unwrap();
        let config = Config::for_base_dir(temp.path());
        let store = FileStore::new(&config).unwrap();
        (temp, store)
    }

    fn leaf() -> Value {
        json!({"id": "1", "speaker": "A", "text": "hi", "children": []})
    }

    #[tokio::test]
    async fn upload_then_read_json() {
        let (_temp, store) = store();
        let body = serde_json::to_vec(&leaf()).unwrap();
        let record = store.upload("alice.json", None, &body).await.unwrap();
        assert_eq!(record.structure_ok, StructureStatus::Valid);
        assert_eq!(store.read("alice.json").await.unwrap(), FileContent::Json(leaf()));
        assert_eq!(store.read_by_id(record.id).await.unwrap(), FileContent::Json(leaf()));
    }

    #[tokio::test]
    async fn upload_rejects_path_separators() {
        let (_temp, store) = store();
        for bad in ["../x.json", "a/b.json", "a\\b.json", "", ".."] {
            assert!(matches!(
                store.upload(bad, None, b"{}").await,
                Err(Error::InvalidPath(_))
            ));
        }
    }

    #[tokio::test]
    async fn csv_is_a_download_and_pickle_a_message() {
        let (_temp, store) = store();
        store.upload("t.csv", Some("data"), b"a,b\n").await.unwrap();
        store.upload("m.pkl", Some("data"), b"\x80\x04").await.unwrap();
        assert!(matches!(
            store.read("data/t.csv").await.unwrap(),
            FileContent::Download { bytes, .. } if bytes == b"a,b\n"
        ));
        assert!(matches!(
            store.read("data/m.pkl").await.unwrap(),
            FileContent::Message { .. }
        ));
    }

    #[tokio::test]
    async fn corrupt_json_read_is_a_server_error() {
        let (_temp, store) = store();
        store.upload("bad.json", None, b"{oops").await.unwrap();
        let err = store.read("bad.json").await.unwrap_err();
        assert!(matches!(err, Error::Json { .. }));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn write_json_checks_type_and_existence() {
        let (_temp, store) = store();
        assert!(matches!(
            store.write_json("missing.json", &leaf()).await,
            Err(Error::NotFound(_))
        ));
        store.upload("t.csv", None, b"a\n").await.unwrap();
        assert!(matches!(
            store.write_json("t.csv", &leaf()).await,
            Err(Error::UnsupportedMedia(_))
        ));
    }

    #[tokio::test]
    async fn write_json_refreshes_validity() {
        let (_temp, store) = store();
        store.upload("a.json", None, b"{}").await.unwrap();
        let record = store.write_json("a.json", &leaf()).await.unwrap();
        assert_eq!(record.structure_ok, StructureStatus::Valid);
    }

    #[tokio::test]
    async fn save_draft_creates_nested_file() {
        let (_temp, store) = store();
        let record = store.save_draft("drafts/new.json", &json!({"a": 1})).await.unwrap();
        assert_eq!(record.path, "drafts/new.json");
        assert_eq!(record.structure_ok, StructureStatus::Invalid);
        assert!(matches!(
            store.save_draft("drafts/new.txt", &json!({})).await,
            Err(Error::UnsupportedMedia(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_file_and_row() {
        let (_temp, store) = store();
        store.upload("a.json", None, b"{}").await.unwrap();
        store.delete("a.json").await.unwrap();
        assert!(store.registry().get_by_name("a.json").unwrap().is_none());
        assert!(matches!(store.delete("a.json").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_by_id_drops_orphan_rows() {
        let (_temp, store) = store();
        let record = store.upload("a.json", None, b"{}").await.unwrap();
        std::fs::remove_file(store.resolver().resolve("a.json").unwrap()).unwrap();
        store.delete_by_id(record.id).await.unwrap();
        assert_eq!(store.registry().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_folder_reports_removed_rows() {
        let (_temp, store) = store();
        store.upload("a.json", Some("batch"), b"{}").await.unwrap();
        store.upload("b.csv", Some("batch/inner"), b"x\n").await.unwrap();
        store.upload("keep.json", None, b"{}").await.unwrap();

        let deletion = store.delete_folder("batch").await.unwrap();
        assert_eq!(deletion.db_files_removed, 2);
        assert!(!store.resolver().resolve("batch").unwrap().exists());
        assert_eq!(store.registry().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn root_cannot_be_deleted_or_created() {
        let (_temp, store) = store();
        assert!(matches!(store.delete_folder("").await, Err(Error::InvalidPath(_))));
        assert!(matches!(store.delete_folder("a/..").await, Err(Error::InvalidPath(_))));
        assert!(matches!(store.create_folder("").await, Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn folders_are_listed_sorted() {
        let (_temp, store) = store();
        store.create_folder("zeta").await.unwrap();
        store.create_folder("alpha/inner").await.unwrap();
        store.upload("f.json", None, b"{}").await.unwrap();
        let names: Vec<_> = store
            .list_folders(None)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn batch_move_reports_each_item() {
        let (_temp, store) = store();
        let a = store.upload("a.json", None, b"{}").await.unwrap();
        store.upload("b.csv", None, b"x\n").await.unwrap();
        let refs = vec![
            FileRef::Id(a.id),
            FileRef::Name("b.csv".into()),
            FileRef::Name("ghost.json".into()),
        ];
        let report = store.move_files(&refs, "archive").unwrap();
        assert_eq!(report.moved.len(), 2);
        assert!(report.moved.iter().all(|r| r.path.starts_with("archive/")));
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            store.move_files(&refs, "../out"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn fix_as_new_file_keeps_original() {
        let (_temp, store) = store();
        let original = store.upload("conv.json", None, b"[]").await.unwrap();
        let first = store.apply_fix(original.id, &leaf(), FixMode::NewFile).await.unwrap();
        let second = store.apply_fix(original.id, &leaf(), FixMode::NewFile).await.unwrap();

        assert_eq!(first.record.name, "conv_fix.json");
        assert_eq!(second.record.name, "conv_fix_2.json");
        assert_ne!(first.record.id, original.id);
        assert_eq!(store.read_json("conv.json").await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn fix_overwrite_takes_a_backup() {
        let (_temp, store) = store();
        let original = store.upload("conv.json", None, b"[]").await.unwrap();
        let outcome = store.apply_fix(original.id, &leaf(), FixMode::Overwrite).await.unwrap();

        assert_eq!(outcome.record.id, original.id);
        assert_eq!(outcome.record.structure_ok, StructureStatus::Valid);
        let backup = outcome.backup.unwrap();
        assert!(backup.starts_with("conv.backup_"));
        assert_eq!(store.read_json(&backup).await.unwrap(), json!([]));

        store.delete_backup(&backup).await.unwrap();
        assert!(!store.resolver().resolve(&backup).unwrap().exists());
    }

    fn backups_in(store: &FileStore) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(store.resolver().root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(BACKUP_MARKER))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn failed_overwrite_restores_original_and_keeps_backup() {
        let (_temp, store) = store();
        let original = store.upload("conv.json", None, b"[1, 2]").await.unwrap();
        let on_disk = store.resolver().resolve("conv.json").unwrap();
        let before = std::fs::read(&on_disk).unwrap();

        let err = store
            .apply_fix_with(original.id, &leaf(), FixMode::Overwrite, |_| {
                Err(std::io::Error::other("disk full"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));

        assert_eq!(std::fs::read(&on_disk).unwrap(), before);
        let backups = backups_in(&store);
        assert_eq!(backups.len(), 1);
        assert_eq!(store.read_json(&backups[0]).await.unwrap(), json!([1, 2]));
        let record = store.registry().get(original.id).unwrap().unwrap();
        assert_eq!(record.structure_ok, original.structure_ok);
    }

    #[tokio::test]
    async fn repeated_overwrites_keep_distinct_backups() {
        let (_temp, store) = store();
        let original = store.upload("conv.json", None, b"[]").await.unwrap();
        let first = store.apply_fix(original.id, &leaf(), FixMode::Overwrite).await.unwrap();
        let second = store.apply_fix(original.id, &leaf(), FixMode::Overwrite).await.unwrap();

        let (first, second) = (first.backup.unwrap(), second.backup.unwrap());
        assert_ne!(first, second);
        assert_eq!(backups_in(&store).len(), 2);
        assert_eq!(store.read_json(&first).await.unwrap(), json!([]));
        assert_eq!(store.read_json(&second).await.unwrap(), leaf());
    }

    #[tokio::test]
    async fn deleting_one_of_two_same_named_files_keeps_the_tracked_row() {
        let (_temp, store) = store();
        store.upload("x.json", Some("a"), b"{}").await.unwrap();
        let tracked = store.upload("x.json", Some("b"), b"{}").await.unwrap();
        assert_eq!(tracked.path, "b/x.json");

        store.delete("a/x.json").await.unwrap();
        let row = store.registry().get_by_name("x.json").unwrap().unwrap();
        assert_eq!(row.id, tracked.id);
        assert_eq!(row.path, "b/x.json");

        store.delete("b/x.json").await.unwrap();
        assert!(store.registry().get_by_name("x.json").unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_backup_refuses_regular_files() {
        let (_temp, store) = store();
        store.upload("conv.json", None, b"[]").await.unwrap();
        assert!(matches!(
            store.delete_backup("conv.json").await,
            Err(Error::MalformedInput(_))
        ));
        assert!(matches!(
            store.delete_backup("../x.backup_1.json").await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn users_are_read_from_tree_documents() {
        let (_temp, store) = store();
        let doc = json!({"users": [{"speaker": "A", "description": "d"}], "tree": leaf()});
        store.save_draft("t.json", &doc).await.unwrap();
        let users = store.users("t.json").await.unwrap();
        assert_eq!(users, json!([{"speaker": "A", "description": "d"}]));
        store.save_draft("n.json", &leaf()).await.unwrap();
        assert!(matches!(store.users("n.json").await, Err(Error::NotFound(_))));
    }
}
