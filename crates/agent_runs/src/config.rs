use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RunError;

/// Overrides [`RunnerConfig::data_dir`].
pub const DATA_DIR_ENV: &str = "AGENT_RUNS_DATA_DIR";

const SESSIONS_FILE: &str = "sessions.json";
const RUNS_DIR: &str = "runs";

/// Runner settings, usually read from a TOML file. Every field has a default.
///
/// ```toml
/// data_dir = "/var/lib/agent-runs"
/// poll_interval_ms = 50
///
/// [binaries]
/// codex = "/opt/codex/bin/codex"
///
/// [codex]
/// web_search = "cached"
/// reasoning_effort = "high"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub data_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub exit_grace_ms: u64,
    /// How often a live tail writes its delivered offset to the session store.
    pub checkpoint_interval_ms: u64,
    pub max_line_bytes: usize,
    pub binaries: BinaryPaths,
    pub codex: CodexOptions,
    pub claude: ClaudeOptions,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".agent-runs"),
            poll_interval_ms: 50,
            exit_grace_ms: 250,
            checkpoint_interval_ms: 200,
            max_line_bytes: run_events::IngestLimits::DEFAULT_MAX_LINE_BYTES,
            binaries: BinaryPaths::default(),
            codex: CodexOptions::default(),
            claude: ClaudeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BinaryPaths {
    pub claude: Option<PathBuf>,
    pub codex: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearch {
    Live,
    Cached,
    #[default]
    Disabled,
}

impl From<WebSearch> for codex::WebSearchMode {
    fn from(value: WebSearch) -> Self {
        match value {
            WebSearch::Live => codex::WebSearchMode::Live,
            WebSearch::Cached => codex::WebSearchMode::Cached,
            WebSearch::Disabled => codex::WebSearchMode::Disabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodexOptions {
    pub web_search: WebSearch,
    pub reasoning_effort: Option<String>,
    pub add_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClaudeOptions {
    pub add_dirs: Vec<String>,
    pub extra_args: Vec<String>,
}

impl RunnerConfig {
    /// Reads `path` and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let text = std::fs::read_to_string(path).map_err(RunError::io(path))?;
        let config: Self = toml::from_str(&text).map_err(|source| RunError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join(SESSIONS_FILE)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join(RUNS_DIR)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms.max(1))
    }
}
