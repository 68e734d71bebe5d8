use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::Backend;
use crate::config::BinaryPaths;
use crate::RunError;

/// Maps a backend onto an absolute executable path, or reports it as not installed.
pub trait BinaryResolver: Send + Sync {
    fn resolve(&self, backend: Backend) -> Result<PathBuf, RunError>;
}

/// Configured path first, then `CLAUDE_BINARY` / `CODEX_BINARY`, then a `PATH` search for the
/// bare binary name.
#[derive(Debug, Clone, Default)]
pub struct DefaultBinaryResolver {
    configured: BinaryPaths,
    path_var: Option<OsString>,
}

impl DefaultBinaryResolver {
    pub fn new(configured: BinaryPaths) -> Self {
        Self {
            configured,
            path_var: env::var_os("PATH"),
        }
    }

    /// Replaces the `PATH` value captured at construction.
    pub fn with_search_path(mut self, path_var: impl Into<OsString>) -> Self {
        self.path_var = Some(path_var.into());
        self
    }

    fn candidates(&self, backend: Backend) -> Vec<PathBuf> {
        let (configured, from_env, bare) = match backend {
            Backend::Claude => (
                self.configured.claude.as_ref(),
                claude_code::default_binary_path(),
                "claude",
            ),
            Backend::Codex => (
                self.configured.codex.as_ref(),
                codex::default_binary_path(),
                "codex",
            ),
        };

        let mut out = Vec::new();
        out.extend(configured.cloned());
        let bare = PathBuf::from(bare);
        if from_env != bare {
            out.push(from_env);
        }
        out.push(bare);
        out
    }

    fn locate(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_absolute() || candidate.components().count() > 1 {
            let absolute = if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                env::current_dir().ok()?.join(candidate)
            };
            return is_executable(&absolute).then_some(absolute);
        }

        let paths = self.path_var.as_ref()?;
        env::split_paths(paths)
            .filter(|dir| dir.is_absolute())
            .map(|dir| dir.join(candidate))
            .find(|path| is_executable(path))
    }
}

impl BinaryResolver for DefaultBinaryResolver {
    fn resolve(&self, backend: Backend) -> Result<PathBuf, RunError> {
        let candidates = self.candidates(backend);
        for candidate in &candidates {
            if let Some(found) = self.locate(candidate) {
                debug!(%backend, binary = %found.display(), "resolved backend binary");
                return Ok(found);
            }
        }

        Err(RunError::Resolution {
            backend,
            searched: candidates
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}
