use crate::ArgsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaudeOutputFormat {
    Text,
    Json,
    StreamJson,
}

impl ClaudeOutputFormat {
    pub(crate) fn as_arg_value(&self) -> &'static str {
        match self {
            ClaudeOutputFormat::Text => "text",
            ClaudeOutputFormat::Json => "json",
            ClaudeOutputFormat::StreamJson => "stream-json",
        }
    }
}

/// Permission posture for a headless run. Each variant maps to exactly one flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClaudePermission {
    #[default]
    Plan,
    AcceptEdits,
    SkipPermissions,
}

impl ClaudePermission {
    fn push_args(self, out: &mut Vec<String>) {
        match self {
            ClaudePermission::Plan => {
                out.push("--permission-mode".to_string());
                out.push("plan".to_string());
            }
            ClaudePermission::AcceptEdits => {
                out.push("--permission-mode".to_string());
                out.push("acceptEdits".to_string());
            }
            ClaudePermission::SkipPermissions => {
                out.push("--dangerously-skip-permissions".to_string());
            }
        }
    }
}

/// Request for `claude --print`.
///
/// Defaults to `stream-json` output, which the CLI only accepts together with `--verbose`.
#[derive(Debug, Clone)]
pub struct ClaudePrintRequest {
    pub(crate) prompt: String,
    pub(crate) output_format: ClaudeOutputFormat,
    pub(crate) model: Option<String>,
    pub(crate) permission: ClaudePermission,
    pub(crate) add_dirs: Vec<String>,
    pub(crate) resume_value: Option<String>,
    pub(crate) extra_args: Vec<String>,
}

impl ClaudePrintRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            output_format: ClaudeOutputFormat::StreamJson,
            model: None,
            permission: ClaudePermission::Plan,
            add_dirs: Vec::new(),
            resume_value: None,
            extra_args: Vec::new(),
        }
    }

    pub fn output_format(mut self, format: ClaudeOutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn permission(mut self, permission: ClaudePermission) -> Self {
        self.permission = permission;
        self
    }

    pub fn add_dirs(mut self, dirs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.add_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn resume_value(mut self, session_id: impl Into<String>) -> Self {
        self.resume_value = Some(session_id.into());
        self
    }

    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn argv(&self) -> Result<Vec<String>, ArgsError> {
        if self.prompt.trim().is_empty() {
            return Err(ArgsError::EmptyPrompt);
        }

        let mut out: Vec<String> = Vec::new();

        out.push("--print".to_string());
        out.push("--output-format".to_string());
        out.push(self.output_format.as_arg_value().to_string());

        if self.output_format == ClaudeOutputFormat::StreamJson {
            out.push("--verbose".to_string());
        }

        if let Some(model) = self.model.as_ref() {
            if model.trim().is_empty() {
                return Err(ArgsError::EmptyModel);
            }
            out.push("--model".to_string());
            out.push(model.clone());
        }

        self.permission.push_args(&mut out);

        if !self.add_dirs.is_empty() {
            out.push("--add-dir".to_string());
            out.extend(self.add_dirs.iter().cloned());
        }

        if let Some(session_id) = self.resume_value.as_ref() {
            if session_id.trim().is_empty() {
                return Err(ArgsError::EmptySessionId);
            }
            out.push("--resume".to_string());
            out.push(session_id.clone());
        }

        out.extend(self.extra_args.iter().cloned());

        out.push(self.prompt.clone());
        Ok(out)
    }
}
