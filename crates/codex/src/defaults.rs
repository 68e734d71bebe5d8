use std::{env, path::PathBuf};

pub const CODEX_BINARY_ENV: &str = "CODEX_BINARY";

/// `CODEX_BINARY` when set, otherwise the bare `codex` name for a `PATH` lookup.
pub fn default_binary_path() -> PathBuf {
    env::var_os(CODEX_BINARY_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("codex"))
}
