use serde::{Deserialize, Serialize};

/// Tri-state structural validity flag stored with every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureStatus {
    Valid,
    Invalid,
    NotApplicable,
}

impl StructureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StructureStatus::Valid => "valid",
            StructureStatus::Invalid => "invalid",
            StructureStatus::NotApplicable => "not-applicable",
        }
    }

    /// Parse the column value. Rows written before the column existed hold
    /// NULL and read back as not-applicable until re-registered.
    pub fn from_column(value: Option<&str>) -> Self {
        match value {
            Some("valid") => StructureStatus::Valid,
            Some("invalid") => StructureStatus::Invalid,
            _ => StructureStatus::NotApplicable,
        }
    }
}

/// A tracked file as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub size: u64,
    pub upload_date: String,
    #[serde(rename = "type")]
    pub file_type: String,
    /// Location relative to the storage root, `/`-separated.
    pub path: String,
    pub structure_ok: StructureStatus,
}

/// Metadata computed from disk before the row is upserted (no id yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub upload_date: String,
    pub file_type: String,
    pub path: String,
    pub structure_ok: StructureStatus,
}

/// List response for `GET /api/files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileRecord>,
    pub total: usize,
    pub folder: Option<String>,
}

/// Outcome of a reconciliation sweep over the storage root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub registered: usize,
    /// Rows dropped because their file no longer exists.
    pub removed: usize,
    pub failed: Vec<String>,
}

/// One immediate subdirectory of a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
}

/// Outcome of a recursive folder deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderDeletion {
    pub path: String,
    pub db_files_removed: usize,
}

/// Reference to a file in a batch move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRef {
    Id(i64),
    Name(String),
    Path(String),
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileRef::Id(id) => write!(f, "id {}", id),
            FileRef::Name(name) => write!(f, "name {}", name),
            FileRef::Path(path) => write!(f, "path {}", path),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveFailure {
    pub reference: String,
    pub error: String,
}

/// Result of a batch move. Items fail independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoveReport {
    pub moved: Vec<FileRecord>,
    pub failed: Vec<MoveFailure>,
}

/// How an LLM-produced fix is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FixMode {
    /// Back up the original, then overwrite it in place.
    #[default]
    Overwrite,
    /// Leave the original alone and write a `_fix` sibling.
    NewFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    pub record: FileRecord,
    pub mode: FixMode,
    /// Root-relative path of the backup taken before an overwrite.
    pub backup: Option<String>,
}

/// Row rewritten by the stored-path normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathUpdate {
    pub id: i64,
    pub name: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub updated: Vec<PathUpdate>,
    pub missing: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_wire_names() {
        let record = FileRecord {
            id: 7,
            name: "alice.json".into(),
            size: 12,
            upload_date: "2026-01-01T00:00:00Z".into(),
            file_type: "json".into(),
            path: "alice.json".into(),
            structure_ok: StructureStatus::NotApplicable,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "json");
        assert_eq!(value["uploadDate"], "2026-01-01T00:00:00Z");
        assert_eq!(value["structureOk"], "not-applicable");
    }

    #[test]
    fn file_ref_accepts_each_form() {
        let refs: Vec<FileRef> =
            serde_json::from_str(r#"[{"id":3},{"name":"a.json"},{"path":"x/a.json"}]"#).unwrap();
        assert_eq!(
            refs,
            vec![
                FileRef::Id(3),
                FileRef::Name("a.json".into()),
                FileRef::Path("x/a.json".into())
            ]
        );
    }

    #[test]
    fn legacy_null_status_reads_as_not_applicable() {
        assert_eq!(StructureStatus::from_column(None), StructureStatus::NotApplicable);
        assert_eq!(StructureStatus::from_column(Some("valid")), StructureStatus::Valid);
    }
}
