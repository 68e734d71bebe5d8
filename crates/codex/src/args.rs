use std::path::{Path, PathBuf};

use crate::ArgsError;

/// Safety overrides that collapse approval/sandbox behavior.
///
/// `Inherit` passes no flag so the CLI falls back to its read-only sandbox.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SafetyOverride {
    #[default]
    Inherit,
    FullAuto,
    DangerouslyBypass,
}

impl SafetyOverride {
    pub const fn flag(self) -> Option<&'static str> {
        match self {
            SafetyOverride::Inherit => None,
            SafetyOverride::FullAuto => Some("--full-auto"),
            SafetyOverride::DangerouslyBypass => Some("--dangerously-bypass-approvals-and-sandbox"),
        }
    }
}

/// Value for the `web_search` config override (`--search` is interactive-only).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WebSearchMode {
    Live,
    Cached,
    #[default]
    Disabled,
}

impl WebSearchMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            WebSearchMode::Live => "live",
            WebSearchMode::Cached => "cached",
            WebSearchMode::Disabled => "disabled",
        }
    }
}

/// Request for a single `codex exec --json` invocation.
///
/// The prompt is always passed as the trailing positional argument; when a
/// thread id is supplied it is carried by the `resume` subcommand and the prompt
/// becomes the follow-up message for that thread.
#[derive(Clone, Debug)]
pub struct ExecRequest {
    pub(crate) prompt: String,
    pub(crate) working_dir: PathBuf,
    pub(crate) model: Option<String>,
    pub(crate) safety: SafetyOverride,
    pub(crate) resume_thread_id: Option<String>,
    pub(crate) reasoning_effort: Option<String>,
    pub(crate) web_search: WebSearchMode,
    pub(crate) add_dirs: Vec<PathBuf>,
}

impl ExecRequest {
    pub fn new(working_dir: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            model: None,
            safety: SafetyOverride::Inherit,
            resume_thread_id: None,
            reasoning_effort: None,
            web_search: WebSearchMode::Disabled,
            add_dirs: Vec::new(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn safety(mut self, safety: SafetyOverride) -> Self {
        self.safety = safety;
        self
    }

    pub fn resume(mut self, thread_id: impl Into<String>) -> Self {
        self.resume_thread_id = Some(thread_id.into());
        self
    }

    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn web_search(mut self, mode: WebSearchMode) -> Self {
        self.web_search = mode;
        self
    }

    pub fn add_dirs(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.add_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Builds the ordered argv (without the binary itself).
    pub fn argv(&self) -> Result<Vec<String>, ArgsError> {
        if self.prompt.trim().is_empty() {
            return Err(ArgsError::EmptyPrompt);
        }

        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--cd".to_string(),
            self.working_dir.to_string_lossy().into_owned(),
        ];

        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(ArgsError::EmptyModel);
            }
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(flag) = self.safety.flag() {
            args.push(flag.to_string());
        }

        if let Some(effort) = &self.reasoning_effort {
            args.push("-c".to_string());
            args.push(format!("model_reasoning_effort=\"{effort}\""));
        }

        args.push("-c".to_string());
        args.push(format!("web_search=\"{}\"", self.web_search.as_str()));

        for dir in &self.add_dirs {
            args.push("--add-dir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }

        // Positional arguments come after every flag.
        if let Some(thread_id) = &self.resume_thread_id {
            if thread_id.trim().is_empty() {
                return Err(ArgsError::EmptyThreadId);
            }
            args.push("resume".to_string());
            args.push(thread_id.clone());
        }
        args.push(self.prompt.clone());

        Ok(args)
    }
}
