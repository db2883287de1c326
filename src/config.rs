use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shell to supervise. When unset, `$SHELL` is used, then `/bin/sh`.
    #[serde(default)]
    pub shell: Option<String>,

    /// Transcript output file, opened write-truncate at startup.
    #[serde(default = "default_transcript_path")]
    pub transcript: PathBuf,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Analyzer / classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Shadow command that receives a copy of all session input, run in its
    /// own pty. When unset, no shadow process is spawned and the classifier
    /// watches the shell's own output instead.
    #[serde(default)]
    pub command: Option<String>,

    /// Patterns that mark a chunk of session output as an error.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
}

/// Error-snapshot configuration. Branch names and the commit message are
/// fixed configuration values, never computed at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Branch recording one commit per detected error.
    #[serde(default = "default_error_branch")]
    pub error_branch: String,

    /// Branch the error branch is created from on first use.
    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,

    /// First line of every snapshot commit; the triggering chunk is appended.
    #[serde(default = "default_commit_message")]
    pub message: String,
}

fn default_transcript_path() -> PathBuf {
    PathBuf::from("typescript")
}

fn default_patterns() -> Vec<String> {
    vec!["(?i)error".to_string(), "(?i)exception".to_string()]
}

fn default_error_branch() -> String {
    "_error".to_string()
}

fn default_primary_branch() -> String {
    "master".to_string()
}

fn default_commit_message() -> String {
    "Error detected during supervised session".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            transcript: default_transcript_path(),
            analyzer: AnalyzerConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: None,
            patterns: default_patterns(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            error_branch: default_error_branch(),
            primary_branch: default_primary_branch(),
            message: default_commit_message(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the shell to supervise: explicit config, then `$SHELL`,
    /// then `/bin/sh`.
    pub fn resolve_shell(&self) -> String {
        if let Some(shell) = &self.shell {
            return shell.clone();
        }
        match std::env::var("SHELL") {
            Ok(shell) if !shell.is_empty() => shell,
            _ => "/bin/sh".to_string(),
        }
    }
}
