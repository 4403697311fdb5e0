use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// One historical convention for stored `path` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Relative to the root's parent, e.g. `files_root/drafts/a.json`.
    /// The redundant root-name prefix is stripped.
    RootNamePrefixed,
    /// Relative to the root itself (the current convention, also bare names).
    RootRelative,
    /// Relative to the service base directory.
    BaseRelative,
}

/// Strategies tried, in order, when locating a stored value on disk.
pub const LEGACY_STRATEGIES: &[ResolutionStrategy] = &[
    ResolutionStrategy::RootNamePrefixed,
    ResolutionStrategy::RootRelative,
    ResolutionStrategy::BaseRelative,
];

/// Maps caller-supplied relative paths to absolute paths inside the storage root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    base_dir: PathBuf,
    strategies: Vec<ResolutionStrategy>,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: lexical_normalize(&root.into()),
            base_dir: lexical_normalize(&base_dir.into()),
            strategies: LEGACY_STRATEGIES.to_vec(),
        }
    }

    pub fn with_strategies(mut self, strategies: &[ResolutionStrategy]) -> Self {
        self.strategies = strategies.to_vec();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if `path` is the root or a component-wise descendant of it.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Resolve a relative path to an absolute location inside the root.
    ///
    /// The empty string resolves to the root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() || rel.has_root() {
            return Err(Error::InvalidPath(format!(
                "absolute paths are not allowed: {}",
                relative
            )));
        }
        let candidate = lexical_normalize(&self.root.join(rel));
        if !self.contains(&candidate) {
            return Err(Error::InvalidPath(format!(
                "{} escapes the storage root",
                relative
            )));
        }
        Ok(candidate)
    }

    /// Locate a stored registry value on disk, trying each strategy in order.
    /// Returns `None` when no candidate exists.
    pub fn locate(&self, stored: &str) -> Option<PathBuf> {
        self.strategies
            .iter()
            .filter_map(|strategy| self.candidate(*strategy, stored))
            .find(|candidate| candidate.exists())
    }

    /// Like [`locate`](Self::locate), but falls back to the best-guess
    /// root-relative candidate so the caller can report "not found".
    pub fn resolve_stored(&self, stored: &str) -> Result<PathBuf> {
        if let Some(found) = self.locate(stored) {
            return Ok(found);
        }
        self.resolve(stored).or_else(|err| {
            self.strategies
                .iter()
                .find_map(|strategy| self.candidate(*strategy, stored))
                .ok_or(err)
        })
    }

    /// Convert an absolute in-root path to its canonical stored form.
    pub fn relative_to_root(&self, path: &Path) -> Result<String> {
        let normalized = lexical_normalize(path);
        let rel = normalized.strip_prefix(&self.root).map_err(|_| {
            Error::InvalidPath(format!("{} is outside the storage root", path.display()))
        })?;
        let segments: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(seg) => Some(seg.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Ok(segments.join("/"))
    }

    fn candidate(&self, strategy: ResolutionStrategy, stored: &str) -> Option<PathBuf> {
        match strategy {
            ResolutionStrategy::RootNamePrefixed => {
                let root_name = self.root.file_name()?;
                let stripped = Path::new(stored).strip_prefix(root_name).ok()?;
                self.resolve(&stripped.to_string_lossy()).ok()
            }
            ResolutionStrategy::RootRelative => self.resolve(stored).ok(),
            ResolutionStrategy::BaseRelative => {
                let rel = Path::new(stored);
                if rel.has_root() {
                    return None;
                }
                let candidate = lexical_normalize(&self.base_dir.join(rel));
                self.contains(&candidate).then_some(candidate)
            }
        }
    }
}

/// Collapse `.` and `..` without touching the file system.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(temp: &TempDir) -> PathResolver {
        let root = temp.path().join("files_root");
        std::fs::create_dir_all(&root).unwrap();
        PathResolver::new(root, temp.path())
    }

    #[test]
    fn resolves_nested_paths_inside_root() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        let resolved = r.resolve("drafts/./a.json").unwrap();
        assert_eq!(resolved, r.root().join("drafts").join("a.json"));
        assert!(r.contains(&resolved));
    }

    #[test]
    fn empty_path_is_the_root() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        assert_eq!(r.resolve("").unwrap(), r.root());
    }

    #[test]
    fn rejects_escapes_and_absolute_paths() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        for bad in ["../secret.json", "a/../../x", "/etc/passwd", "drafts/../../files_root-foo/x"] {
            assert!(
                matches!(r.resolve(bad), Err(Error::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn dotdot_that_stays_inside_is_accepted() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        let resolved = r.resolve("a/b/../c.json").unwrap();
        assert_eq!(resolved, r.root().join("a").join("c.json"));
        let back_in = r.resolve("../files_root/c.json").unwrap();
        assert_eq!(back_in, r.root().join("c.json"));
    }

    #[test]
    fn sibling_with_shared_prefix_is_not_inside() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        let sibling = temp.path().join("files_root-foo").join("x.json");
        assert!(!r.contains(&sibling));
        assert!(r.relative_to_root(&sibling).is_err());
    }

    #[test]
    fn relative_to_root_uses_forward_slashes() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        let abs = r.root().join("drafts").join("a.json");
        assert_eq!(r.relative_to_root(&abs).unwrap(), "drafts/a.json");
        assert_eq!(r.relative_to_root(r.root()).unwrap(), "");
    }

    #[test]
    fn legacy_root_prefixed_value_is_located() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        std::fs::create_dir_all(r.root().join("drafts")).unwrap();
        std::fs::write(r.root().join("drafts").join("a.json"), "{}").unwrap();

        let found = r.locate("files_root/drafts/a.json").unwrap();
        assert_eq!(found, r.root().join("drafts").join("a.json"));
        assert_eq!(r.locate("drafts/a.json").unwrap(), found);
    }

    #[test]
    fn missing_stored_value_falls_back_to_root_relative_guess() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp);
        assert!(r.locate("ghost.json").is_none());
        assert_eq!(r.resolve_stored("ghost.json").unwrap(), r.root().join("ghost.json"));
    }

    #[test]
    fn strategies_can_be_dropped() {
        let temp = TempDir::new().unwrap();
        let r = resolver(&temp).with_strategies(&[ResolutionStrategy::RootRelative]);
        std::fs::write(r.root().join("a.json"), "{}").unwrap();
        assert!(r.locate("files_root/a.json").is_none());
        assert!(r.locate("a.json").is_some());
    }
}
