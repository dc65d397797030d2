//! Configuration parsing and validation
//!
//! # Configuration Files
//!
//! - `dmt.yaml` - Project root configuration
//! - `migrations/*.{json,yaml,yml}` - Migration documents run by `dmt run --all`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::document::MigrationDocument;
use crate::error::{Error, Result};
use crate::pipeline::DEFAULT_PIPE_CAPACITY;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "dmt.yaml";

/// Directory holding migration documents, relative to the project root
pub const MIGRATIONS_DIR: &str = "migrations";

/// Root project configuration from `dmt.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Extension selection
    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Bytes buffered between a formatter and its target
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pipe_capacity: default_pipe_capacity(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_pipe_capacity() -> usize {
    DEFAULT_PIPE_CAPACITY
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Which extensions the registry loads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Extension names skipped when the catalog is built
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// Main configuration container
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Base path of the project
    pub base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            base_path: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from a directory or a `dmt.yaml` file
    ///
    /// ```rust,ignore
    /// let config = Config::load("./my-project")?;
    /// println!("pipe: {}", config.runtime().pipe_capacity);
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let (config_path, base_path) = locate(path);

        if !config_path.exists() {
            return Err(Error::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let project: ProjectConfig = if contents.trim().is_empty() {
            ProjectConfig::default()
        } else {
            serde_yaml::from_str(&contents)?
        };
        project.validate()?;

        Ok(Self { project, base_path })
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load(&path) {
            Err(Error::ConfigNotFound { .. }) => Ok(Self {
                base_path: locate(path.as_ref()).1,
                ..Self::default()
            }),
            other => other,
        }
    }

    /// Runtime section
    pub fn runtime(&self) -> &RuntimeConfig {
        &self.project.runtime
    }

    /// Extensions section
    pub fn extensions(&self) -> &ExtensionsConfig {
        &self.project.extensions
    }

    /// Load every document under `migrations/`, sorted by file name
    pub fn load_documents(&self) -> Result<Vec<(PathBuf, MigrationDocument)>> {
        let dir = self.base_path.join(MIGRATIONS_DIR);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut paths: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext == "json" || ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        paths
            .into_iter()
            .map(|path| MigrationDocument::load(&path).map(|doc| (path, doc)))
            .collect()
    }
}

/// Config file and project root for a directory or file path
fn locate(path: &Path) -> (PathBuf, PathBuf) {
    if path.is_dir() {
        (path.join(CONFIG_FILE), path.to_path_buf())
    } else {
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        (path.to_path_buf(), base.to_path_buf())
    }
}

impl ProjectConfig {
    fn validate(&self) -> Result<()> {
        if self.runtime.pipe_capacity == 0 {
            return Err(Error::ConfigInvalid {
                message: "runtime.pipe_capacity must be greater than zero".to_string(),
            });
        }
        if let Some(blank) = self.extensions.disabled.iter().find(|n| n.trim().is_empty()) {
            return Err(Error::ConfigInvalid {
                message: format!("extensions.disabled contains a blank name '{}'", blank),
            });
        }
        Ok(())
    }
}
