//! Service configuration: defaults, overlaid by a TOML file, then by
//! environment variables. CLI flags are applied by the binary last.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "convtree.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a request body, uploads included.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    /// Overridden by `GROQ_API_KEY` when set.
    pub api_key: Option<String>,
    /// Whole-request timeout; unset leaves the transport defaults alone.
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "meta-llama/llama-4-maverick-17b-128e-instruct".to_string(),
            api_key: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_dir: PathBuf,
    /// Defaults to `<base_dir>/files_root`.
    pub storage_root: Option<PathBuf>,
    /// Defaults to `<base_dir>/db.sqlite3`.
    pub database_path: Option<PathBuf>,
    pub allowed_extensions: Vec<String>,
    /// Root-relative path served by `GET /api/discussion`.
    pub discussion_file: String,
    pub server: ServerConfig,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            storage_root: None,
            database_path: None,
            allowed_extensions: vec!["json".into(), "pkl".into(), "csv".into()],
            discussion_file: "discussion.json".to_string(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Defaults rooted at `base_dir`.
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Load from `explicit`, else the first config file found, then apply the
    /// process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match discover_config_file() {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(lookup);
        config.base_dir = absolutize(&config.base_dir)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("CONVTREE_BASE_DIR") {
            self.base_dir = PathBuf::from(value);
        }
        if let Some(value) = get("CONVTREE_STORAGE_ROOT") {
            self.storage_root = Some(PathBuf::from(value));
        }
        if let Some(value) = get("CONVTREE_DB") {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("GROQ_API_KEY") {
            self.llm.api_key = Some(value);
        }
        if let Some(value) = get("CONVTREE_LLM_MODEL") {
            self.llm.model = value;
        }
    }

    fn under_base(&self, path: &Path) -> PathBuf {
        let expanded = expand(path);
        if expanded.is_absolute() {
            expanded
        } else {
            expand(&self.base_dir).join(expanded)
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        match &self.storage_root {
            Some(path) => self.under_base(path),
            None => expand(&self.base_dir).join("files_root"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => self.under_base(path),
            None => expand(&self.base_dir).join("db.sqlite3"),
        }
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    let expanded = expand(path);
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(expanded))
}

/// `./convtree.toml`, then the platform config directory.
fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    directories::ProjectDirs::from("", "", "convtree")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}
