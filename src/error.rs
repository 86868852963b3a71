//! Capture error taxonomy.
//!
//! Every failure that can end an `initialize` call is a `CaptureError`. The value is
//! cloned into the provider's error latch, so it must be `Clone` and comparable:
//! a latched provider hands back an equal error on every later call.

use thiserror::Error;

/// Result type alias for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors raised while building or running a capture pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// A stage could not be created or added to the graph.
    #[error("failed to create stage '{stage}': {reason}")]
    StageCreation { stage: String, reason: String },

    /// A stage refused to enumerate its pins.
    #[error("failed to enumerate pins on '{stage}': {reason}")]
    PinEnumeration { stage: String, reason: String },

    /// No free output/input pin pair between two stages would connect.
    #[error("no compatible endpoint between '{upstream}' and '{downstream}'")]
    NoCompatibleEndpoint { upstream: String, downstream: String },

    /// A single connection attempt was refused by the downstream stage.
    #[error("connection rejected: {reason}")]
    ConnectionRejected { reason: String },

    /// The negotiated sample does not match the configured frame format.
    #[error("sample size mismatch on '{stage}': expected {expected} bytes, got {actual}")]
    SampleSizeMismatch {
        stage: String,
        expected: usize,
        actual: usize,
    },

    /// The stage could not attach the sample callback.
    #[error("failed to attach sample callback on '{stage}': {reason}")]
    Callback { stage: String, reason: String },

    /// The graph or device refused to start streaming.
    #[error("failed to start capture: {reason}")]
    StartFailed { reason: String },

    /// Device open/configuration failure outside a filter graph.
    #[error("capture device error: {reason}")]
    Device { reason: String },

    /// Invalid capture configuration.
    #[error("invalid capture configuration: {0}")]
    Config(String),
}

impl CaptureError {
    /// Stable numeric code for the error class.
    ///
    /// Codes are negative so that callers bridging into status-code APIs can treat
    /// any non-negative value as success.
    pub fn code(&self) -> i32 {
        match self {
            CaptureError::StageCreation { .. } => -1,
            CaptureError::PinEnumeration { .. } => -2,
            CaptureError::NoCompatibleEndpoint { .. } => -3,
            CaptureError::ConnectionRejected { .. } => -4,
            CaptureError::SampleSizeMismatch { .. } => -5,
            CaptureError::Callback { .. } => -6,
            CaptureError::StartFailed { .. } => -7,
            CaptureError::Device { .. } => -8,
            CaptureError::Config(_) => -9,
        }
    }

    pub(crate) fn stage_creation(stage: &str, reason: impl Into<String>) -> Self {
        CaptureError::StageCreation {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        CaptureError::ConnectionRejected {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_negative() {
        let errors = [
            CaptureError::stage_creation("src", "x"),
            CaptureError::PinEnumeration {
                stage: "src".into(),
                reason: "x".into(),
            },
            CaptureError::NoCompatibleEndpoint {
                upstream: "a".into(),
                downstream: "b".into(),
            },
            CaptureError::rejected("x"),
            CaptureError::SampleSizeMismatch {
                stage: "grabber".into(),
                expected: 1,
                actual: 2,
            },
            CaptureError::Callback {
                stage: "grabber".into(),
                reason: "x".into(),
            },
            CaptureError::StartFailed { reason: "x".into() },
            CaptureError::Device { reason: "x".into() },
            CaptureError::Config("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(CaptureError::code).collect();
        assert!(codes.iter().all(|code| *code < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn display_names_both_stages() {
        let err = CaptureError::NoCompatibleEndpoint {
            upstream: "Sample Grabber".into(),
            downstream: "Null Renderer".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Sample Grabber"));
        assert!(text.contains("Null Renderer"));
    }
}
