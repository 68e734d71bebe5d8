use std::path::PathBuf;

use claude_code::{ClaudePermission, ClaudePrintRequest};
use codex::{ExecRequest, SafetyOverride};

use crate::backend::{Backend, PermissionMode, ResumeToken};
use crate::config::RunnerConfig;
use crate::RunError;

/// Everything that decides the argv of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub backend: Backend,
    pub permission_mode: PermissionMode,
    pub model: Option<String>,
    pub working_dir: PathBuf,
    pub resume: Option<ResumeToken>,
    pub prompt: String,
}

/// Builds the ordered argument list (without the binary) for `request`.
///
/// A resume token from the other backend is a configuration error, never silently dropped.
pub fn build_args(request: &RunRequest, config: &RunnerConfig) -> Result<Vec<String>, RunError> {
    if let Some(token) = &request.resume {
        if token.backend() != request.backend {
            return Err(RunError::ResumeTokenMismatch {
                backend: request.backend,
                token_backend: token.backend(),
            });
        }
    }

    match request.backend {
        Backend::Codex => codex_args(request, config),
        Backend::Claude => claude_args(request, config),
    }
}

fn codex_args(request: &RunRequest, config: &RunnerConfig) -> Result<Vec<String>, RunError> {
    let safety = match request.permission_mode {
        PermissionMode::Plan => SafetyOverride::Inherit,
        PermissionMode::Build => SafetyOverride::FullAuto,
        PermissionMode::Yolo => SafetyOverride::DangerouslyBypass,
    };

    let mut exec = ExecRequest::new(&request.working_dir, &request.prompt)
        .safety(safety)
        .web_search(config.codex.web_search.into())
        .add_dirs(config.codex.add_dirs.iter().cloned());
    if let Some(model) = &request.model {
        exec = exec.model(model);
    }
    if let Some(effort) = &config.codex.reasoning_effort {
        exec = exec.reasoning_effort(effort);
    }
    if let Some(token) = &request.resume {
        exec = exec.resume(token.as_str());
    }
    Ok(exec.argv()?)
}

fn claude_args(request: &RunRequest, config: &RunnerConfig) -> Result<Vec<String>, RunError> {
    let permission = match request.permission_mode {
        PermissionMode::Plan => ClaudePermission::Plan,
        PermissionMode::Build => ClaudePermission::AcceptEdits,
        PermissionMode::Yolo => ClaudePermission::SkipPermissions,
    };

    let mut print = ClaudePrintRequest::new(&request.prompt)
        .permission(permission)
        .add_dirs(config.claude.add_dirs.iter().cloned())
        .extra_args(config.claude.extra_args.iter().cloned());
    if let Some(model) = &request.model {
        print = print.model(model);
    }
    if let Some(token) = &request.resume {
        print = print.resume_value(token.as_str());
    }
    Ok(print.argv()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERMISSION_FLAGS: &[&str] = &[
        "--full-auto",
        "--dangerously-bypass-approvals-and-sandbox",
        "--permission-mode",
        "--dangerously-skip-permissions",
    ];

    fn request(backend: Backend, mode: PermissionMode) -> RunRequest {
        RunRequest {
            backend,
            permission_mode: mode,
            model: None,
            working_dir: PathBuf::from("/work/tree"),
            resume: None,
            prompt: "ship it".to_string(),
        }
    }

    fn permission_flags(argv: &[String]) -> Vec<&str> {
        argv.iter()
            .map(String::as_str)
            .filter(|arg| PERMISSION_FLAGS.contains(arg))
            .collect()
    }

    #[test]
    fn permission_mapping_per_backend() {
        let config = RunnerConfig::default();
        let cases: &[(Backend, PermissionMode, &[&str])] = &[
            (Backend::Codex, PermissionMode::Plan, &[]),
            (Backend::Codex, PermissionMode::Build, &["--full-auto"]),
            (
                Backend::Codex,
                PermissionMode::Yolo,
                &["--dangerously-bypass-approvals-and-sandbox"],
            ),
            (Backend::Claude, PermissionMode::Plan, &["--permission-mode"]),
            (Backend::Claude, PermissionMode::Build, &["--permission-mode"]),
            (
                Backend::Claude,
                PermissionMode::Yolo,
                &["--dangerously-skip-permissions"],
            ),
        ];

        for (backend, mode, expected) in cases {
            let argv = build_args(&request(*backend, *mode), &config).unwrap();
            assert_eq!(
                permission_flags(&argv),
                expected.to_vec(),
                "{backend} / {mode}"
            );
        }

        let argv = build_args(&request(Backend::Claude, PermissionMode::Plan), &config).unwrap();
        let idx = argv.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(argv[idx + 1], "plan");
        let argv = build_args(&request(Backend::Claude, PermissionMode::Build), &config).unwrap();
        let idx = argv.iter().position(|a| a == "--permission-mode").unwrap();
        assert_eq!(argv[idx + 1], "acceptEdits");
    }

    #[test]
    fn codex_resume_never_carries_a_fresh_prompt() {
        let mut req = request(Backend::Codex, PermissionMode::Build);
        req.resume = Some(ResumeToken::CodexThread("T1".to_string()));
        let argv = build_args(&req, &RunnerConfig::default()).unwrap();

        let idx = argv.iter().position(|a| a == "resume").unwrap();
        assert_eq!(&argv[idx..], ["resume", "T1", "ship it"]);
        assert_eq!(argv.iter().filter(|a| *a == "ship it").count(), 1);
    }

    #[test]
    fn mismatched_resume_token_is_an_error() {
        let mut req = request(Backend::Claude, PermissionMode::Plan);
        req.resume = Some(ResumeToken::CodexThread("T1".to_string()));

        assert!(matches!(
            build_args(&req, &RunnerConfig::default()),
            Err(RunError::ResumeTokenMismatch {
                backend: Backend::Claude,
                token_backend: Backend::Codex,
            })
        ));
    }

    #[test]
    fn config_knobs_reach_the_argv() {
        let mut config = RunnerConfig::default();
        config.codex.reasoning_effort = Some("high".to_string());
        config.claude.extra_args = vec!["--max-turns".to_string(), "4".to_string()];

        let argv = build_args(&request(Backend::Codex, PermissionMode::Plan), &config).unwrap();
        assert!(argv.contains(&"model_reasoning_effort=\"high\"".to_string()));
        assert!(argv.contains(&"web_search=\"disabled\"".to_string()));

        let mut req = request(Backend::Claude, PermissionMode::Plan);
        req.model = Some("opus".to_string());
        let argv = build_args(&req, &config).unwrap();
        assert!(argv.windows(2).any(|w| w == ["--model", "opus"]));
        assert!(argv.windows(2).any(|w| w == ["--max-turns", "4"]));
        assert_eq!(argv.last().unwrap(), "ship it");
    }
}
