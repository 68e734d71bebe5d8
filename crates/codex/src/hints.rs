/// Maps well-known Codex authentication failures onto an operator-facing hint.
///
/// Returns `None` for everything else; callers keep the raw message either way.
pub fn auth_failure_hint(message: &str) -> Option<&'static str> {
    if message.contains("refresh_token_invalidated")
        || message.contains("refresh token has been invalidated")
    {
        return Some("Codex login session has expired; sign in again.");
    }
    if message.contains("401 Unauthorized") || message.contains("invalidated oauth token") {
        return Some("Codex authentication failed; sign in again.");
    }
    None
}
