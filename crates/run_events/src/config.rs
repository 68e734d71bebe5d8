use crate::error::ErrorDetailSink;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum ErrorDetailCapture {
    #[default]
    RedactedSummaryOnly,
    FullDetails,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IngestLimits {
    pub max_line_bytes: usize,
}

impl IngestLimits {
    pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: Self::DEFAULT_MAX_LINE_BYTES,
        }
    }
}

pub struct IngestConfig {
    pub limits: IngestLimits,
    pub error_detail_capture: ErrorDetailCapture,
    pub error_sink: Option<Box<dyn ErrorDetailSink>>,
}

impl IngestConfig {
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            limits: IngestLimits { max_line_bytes },
            ..Self::default()
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            limits: IngestLimits::default(),
            error_detail_capture: ErrorDetailCapture::RedactedSummaryOnly,
            error_sink: None,
        }
    }
}

impl std::fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestConfig")
            .field("limits", &self.limits)
            .field("error_detail_capture", &self.error_detail_capture)
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}
