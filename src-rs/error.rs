//! Why a capture session ended without an image.

use std::time::Duration;
use thiserror::Error;

use crate::config::CaptureConfig;

/// Failures that end a capture session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("target offset {0} is outside the capturable content")]
    InvalidTarget(f64),

    #[error("snapshot request failed on step {step}")]
    SnapshotFailure {
        step: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to decode captured frame {index}")]
    DecodeFailure {
        index: usize,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save stitched image")]
    PersistenceFailure(#[source] anyhow::Error),

    #[error("no frames were captured")]
    NoFrames,

    #[error("failed to encode stitched image")]
    Encode(#[source] image::ImageError),

    #[error("capture cancelled")]
    Cancelled,
}

impl CaptureError {
    /// Short text shown in the progress indicator before the session ends.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::InvalidTarget(_) => "Click inside the page, below its top, to capture",
            CaptureError::SnapshotFailure { .. } => "Capture failed: this page cannot be captured",
            CaptureError::DecodeFailure { .. } => "Capture failed: could not load a captured frame",
            CaptureError::PersistenceFailure(_) => "Save failed",
            CaptureError::NoFrames => "Capture failed: nothing was captured",
            CaptureError::Encode(_) => "Capture failed: could not encode the image",
            CaptureError::Cancelled => "Capture cancelled",
        }
    }

    /// How long the message stays on screen.
    pub fn dwell(&self, config: &CaptureConfig) -> Duration {
        match self {
            CaptureError::InvalidTarget(_) | CaptureError::Cancelled => {
                Duration::from_millis(config.invalid_target_dwell_ms)
            }
            _ => Duration::from_millis(config.failure_dwell_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn snapshot_failure_keeps_source_chain() {
        let err = CaptureError::SnapshotFailure {
            step: 2,
            source: anyhow!("restricted page"),
        };
        let chain = format!("{:#}", anyhow::Error::new(err));
        assert!(chain.contains("step 2"));
        assert!(chain.contains("restricted page"));
    }

    #[test]
    fn invalid_target_uses_short_dwell() {
        let config = CaptureConfig::default();
        assert_eq!(
            CaptureError::InvalidTarget(0.0).dwell(&config),
            Duration::from_millis(1500)
        );
        assert_eq!(
            CaptureError::NoFrames.dwell(&config),
            Duration::from_millis(2500)
        );
    }
}
