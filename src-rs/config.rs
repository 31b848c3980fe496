//! Capture tunables and where output lands.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const OUT_DIR_ENV: &str = "SCROLLSHOT_OUT_DIR";
const DEFAULT_OUT_DIR: &str = ".scrollshot";
/// A scroll is only reliably laid out and painted after two frame boundaries.
pub const MIN_SETTLE_FRAMES: u32 = 2;

/// Tunables for one capture session. Every field has a default, so a config
/// file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Wait after scrolling so lazy content and animations settle.
    pub settle_delay_ms: u64,
    /// Wait after hiding occluders so the hide is painted.
    pub paint_delay_ms: u64,
    /// Rendering-frame boundaries to wait for after each scroll.
    pub settle_frames: u32,
    /// The document must overflow the viewport by more than this to count as scrollable.
    pub document_slack_px: f64,
    pub container_overflow_px: f64,
    pub container_min_height_px: f64,
    pub max_visited_nodes: usize,
    pub max_enqueued_nodes: usize,
    pub failure_dwell_ms: u64,
    pub invalid_target_dwell_ms: u64,
    pub max_title_chars: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 300,
            paint_delay_ms: 50,
            settle_frames: MIN_SETTLE_FRAMES,
            document_slack_px: 50.0,
            container_overflow_px: 10.0,
            container_min_height_px: 100.0,
            max_visited_nodes: 2000,
            max_enqueued_nodes: 4000,
            failure_dwell_ms: 2500,
            invalid_target_dwell_ms: 1500,
            max_title_chars: 100,
        }
    }
}

impl CaptureConfig {
    /// No settle or dwell waits; used by tests and offline scenes.
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            paint_delay_ms: 0,
            failure_dwell_ms: 0,
            invalid_target_dwell_ms: 0,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: CaptureConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_visited_nodes == 0 || self.max_enqueued_nodes == 0 {
            bail!("node budgets must be greater than zero");
        }
        if self.max_enqueued_nodes < self.max_visited_nodes {
            bail!(
                "max_enqueued_nodes ({}) must be at least max_visited_nodes ({})",
                self.max_enqueued_nodes,
                self.max_visited_nodes
            );
        }
        for (name, value) in [
            ("document_slack_px", self.document_slack_px),
            ("container_overflow_px", self.container_overflow_px),
            ("container_min_height_px", self.container_min_height_px),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be a non-negative number, got {value}");
            }
        }
        if self.settle_frames < MIN_SETTLE_FRAMES {
            bail!(
                "settle_frames must be at least {MIN_SETTLE_FRAMES}, got {}",
                self.settle_frames
            );
        }
        if self.max_title_chars == 0 {
            bail!("max_title_chars must be greater than zero");
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn paint_delay(&self) -> Duration {
        Duration::from_millis(self.paint_delay_ms)
    }
}

/// `--out-dir`, then `SCROLLSHOT_OUT_DIR`, then `.scrollshot`.
pub fn out_root(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| {
            env::var(OUT_DIR_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_config_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"settle_delay_ms": 120, "max_title_chars": 40}"#).unwrap();

        let config = CaptureConfig::load(&path).unwrap();
        assert_eq!(config.settle_delay_ms, 120);
        assert_eq!(config.max_title_chars, 40);
        assert_eq!(config.paint_delay_ms, 50);
        assert_eq!(config.max_visited_nodes, 2000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"settle_delay": 120}"#).unwrap();
        assert!(CaptureConfig::load(&path).is_err());
    }

    #[test]
    fn budgets_are_validated() {
        let config = CaptureConfig {
            max_visited_nodes: 10,
            max_enqueued_nodes: 5,
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CaptureConfig {
            document_slack_px: -1.0,
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(CaptureConfig::immediate().validate().is_ok());
    }

    #[test]
    fn fewer_than_two_settle_frames_is_rejected() {
        for settle_frames in [0, 1] {
            let config = CaptureConfig {
                settle_frames,
                ..CaptureConfig::immediate()
            };
            assert!(config.validate().is_err());
        }

        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"settle_frames": 0}"#).unwrap();
        assert!(CaptureConfig::load(&path).is_err());
    }

    #[test]
    fn explicit_out_dir_wins() {
        assert_eq!(
            out_root(Some(Path::new("/tmp/shots"))),
            PathBuf::from("/tmp/shots")
        );
    }
}
