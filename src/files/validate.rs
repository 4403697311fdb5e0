//! Structural checks for conversation tree and draft documents.

use super::schema::StructureStatus;
use serde_json::{Map, Value};
use std::path::{Component, Path};

const NODE_KEYS: [&str; 4] = ["id", "speaker", "text", "children"];
const DISCUSSION_KEYS: [&str; 5] = ["id", "referenceId", "speaker", "text", "addressees"];
const TREE_FILE_KEYS: [&str; 2] = ["users", "tree"];
const DRAFT_FILE_KEYS: [&str; 4] = ["fileRef", "users", "tree", "discussion"];

/// Per-document classification. `code()` mirrors the exit codes of the
/// `check` subcommand so log lines stay comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Tree,
    Draft,
    Mismatch,
    Unreadable(String),
}

impl Verdict {
    pub fn code(&self) -> i32 {
        match self {
            Verdict::Tree => 0,
            Verdict::Draft => 1,
            Verdict::Mismatch => 2,
            Verdict::Unreadable(_) => 3,
        }
    }

    pub fn status(&self) -> StructureStatus {
        match self {
            Verdict::Tree | Verdict::Draft => StructureStatus::Valid,
            Verdict::Mismatch | Verdict::Unreadable(_) => StructureStatus::Invalid,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Tree => "tree",
            Verdict::Draft => "draft",
            Verdict::Mismatch => "mismatch",
            Verdict::Unreadable(_) => "unreadable",
        }
    }
}

fn has_exact_keys(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    obj.len() == keys.len() && keys.iter().all(|k| obj.contains_key(*k))
}

fn is_string(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).is_some_and(Value::is_string)
}

/// Recursive `{id, speaker, text, children}` check.
pub fn is_node(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if !has_exact_keys(obj, &NODE_KEYS) {
        return false;
    }
    if !["id", "speaker", "text"].iter().all(|k| is_string(obj, k)) {
        return false;
    }
    match obj.get("children").and_then(Value::as_array) {
        Some(children) => children.iter().all(is_node),
        None => false,
    }
}

pub fn is_discussion_item(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if !has_exact_keys(obj, &DISCUSSION_KEYS) {
        return false;
    }
    if !obj.get("id").is_some_and(Value::is_number) {
        return false;
    }
    if !["referenceId", "speaker", "text"].iter().all(|k| is_string(obj, k)) {
        return false;
    }
    obj.get("addressees")
        .and_then(Value::as_array)
        .is_some_and(|list| list.iter().all(Value::is_string))
}

fn is_tree_file(obj: &Map<String, Value>) -> bool {
    has_exact_keys(obj, &TREE_FILE_KEYS)
        && obj.get("users").is_some_and(Value::is_array)
        && obj.get("tree").is_some_and(is_node)
}

fn is_draft_file(obj: &Map<String, Value>) -> bool {
    has_exact_keys(obj, &DRAFT_FILE_KEYS)
        && is_string(obj, "fileRef")
        && obj.get("users").is_some_and(Value::is_array)
        && obj.get("tree").is_some_and(is_node)
        && obj
            .get("discussion")
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().all(is_discussion_item))
}

/// Classify a parsed document. A bare root node counts as a tree.
pub fn classify(value: &Value) -> Verdict {
    let Some(obj) = value.as_object() else {
        return Verdict::Mismatch;
    };
    if is_tree_file(obj) || is_node(value) {
        Verdict::Tree
    } else if is_draft_file(obj) {
        Verdict::Draft
    } else {
        Verdict::Mismatch
    }
}

/// Parse raw bytes and classify them.
pub fn classify_bytes(data: &[u8]) -> Verdict {
    match serde_json::from_slice::<Value>(data) {
        Ok(value) => classify(&value),
        Err(e) => Verdict::Unreadable(e.to_string()),
    }
}

/// Files under a `user` directory, or whose own name contains "user",
/// are not conversation documents. `relative` is root-relative.
pub fn is_excluded(relative: &Path) -> bool {
    let segments: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(seg) => Some(seg.to_string_lossy().to_lowercase()),
            _ => None,
        })
        .collect();
    let Some((name, dirs)) = segments.split_last() else {
        return false;
    };
    name.contains("user") || dirs.iter().any(|d| d == "user")
}

/// Read one file and classify it. Returns `None` for excluded files.
pub fn check_file(path: &Path, relative: &Path) -> Option<Verdict> {
    if is_excluded(relative) {
        return None;
    }
    Some(match std::fs::read(path) {
        Ok(data) => classify_bytes(&data),
        Err(e) => Verdict::Unreadable(e.to_string()),
    })
}

/// Classify every non-excluded `.json` file under `root`, sorted by path.
pub fn scan(root: &Path) -> Vec<(String, Verdict)> {
    let mut verdicts: Vec<(String, Verdict)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?.to_path_buf();
            let verdict = check_file(entry.path(), &relative)?;
            Some((relative.to_string_lossy().replace('\\', "/"), verdict))
        })
        .collect();
    verdicts.sort_by(|a, b| a.0.cmp(&b.0));
    verdicts
}

/// Exit status for a whole scan: 0 when everything is a tree, 1 when drafts
/// are present, 2 as soon as one file fails.
pub fn overall_code(verdicts: &[(String, Verdict)]) -> i32 {
    verdicts
        .iter()
        .map(|(_, verdict)| verdict.code().min(2))
        .max()
        .unwrap_or(0)
}

/// Registry flag for a JSON file.
pub fn structure_status(path: &Path, relative: &Path) -> StructureStatus {
    match check_file(path, relative) {
        None => StructureStatus::NotApplicable,
        Some(verdict) => {
            if let Verdict::Unreadable(reason) = &verdict {
                tracing::debug!(path = %path.display(), code = verdict.code(), %reason, "JSON unreadable");
            }
            verdict.status()
        }
    }
}
