use thiserror::Error;

/// Job-terminal and lookup errors surfaced by the job service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FalconError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid format '{0}': format must be 'json' or 'csv'")]
    InvalidFormat(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to acquire page content: {0}")]
    Acquisition(String),

    #[error("render session failed: {0}")]
    RenderSession(String),

    #[error("AI extraction failed: {0}")]
    Extraction(String),

    #[error("data processing failed: {0}")]
    Processing(String),

    #[error("job timed out after {0}s")]
    Timeout(u64),

    #[error("cancelled by user")]
    Cancelled,

    #[error("job {0} already finished")]
    AlreadyFinished(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl FalconError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Short machine-readable tag, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidFormat(_) => "invalid_format",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Acquisition(_) => "acquisition_failure",
            Self::RenderSession(_) => "render_session_failure",
            Self::Extraction(_) => "extraction_failure",
            Self::Processing(_) => "processing_failure",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::AlreadyFinished(_) => "already_finished",
            Self::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for FalconError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_message_is_stable() {
        assert_eq!(FalconError::Cancelled.to_string(), "cancelled by user");
    }

    #[test]
    fn timeout_message_mentions_timeout() {
        let msg = FalconError::Timeout(5).to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("5s"));
    }

    #[test]
    fn kinds_are_snake_case() {
        for err in [
            FalconError::not_found("job x"),
            FalconError::InvalidFormat("xml".into()),
            FalconError::AlreadyFinished("j".into()),
            FalconError::Timeout(1),
        ] {
            let kind = err.kind();
            assert!(kind.chars().all(|c| c.is_ascii_lowercase() || c == '_'), "{kind}");
        }
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: FalconError = io.into();
        assert!(matches!(err, FalconError::Io(ref m) if m.contains("disk full")));
    }
}
