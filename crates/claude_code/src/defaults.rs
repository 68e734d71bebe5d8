use std::{env, path::PathBuf};

/// Environment variable overriding the `claude` binary.
pub const CLAUDE_BINARY_ENV: &str = "CLAUDE_BINARY";

pub fn default_binary_path() -> PathBuf {
    env::var_os(CLAUDE_BINARY_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("claude"))
}
