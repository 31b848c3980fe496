//! Walks the scroll surface step by step and photographs each viewport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::occlusion;
use crate::page::Page;
use crate::scroll::ScrollContext;

/// Photographs the currently visible viewport of a page.
pub trait SnapshotService {
    /// Returns encoded image bytes for what `page` shows right now.
    fn capture_visible(&mut self, page: &dyn Page) -> anyhow::Result<Vec<u8>>;
}

/// One captured viewport and the scroll offset that was actually in effect.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    pub image: Vec<u8>,
    pub offset: f64,
}

/// Shared cancel request, observed between steps only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepProgress {
    /// 1-based.
    pub step: usize,
    pub total: usize,
}

/// Upper bound on the steps of one capture.
pub const MAX_STEPS: usize = 1000;

/// Number of steps needed to reach `target`, or `None` past [`MAX_STEPS`].
pub fn step_count(target: f64, step_size: f64) -> Option<usize> {
    if step_size.is_nan() || step_size <= 0.0 || !target.is_finite() {
        return Some(1);
    }
    let count = (target / step_size).ceil().max(1.0);
    if count > MAX_STEPS as f64 {
        return None;
    }
    Some(count as usize)
}

/// Requested offsets `0, S, 2S, ...` strictly below `target`; a single `0`
/// when the target fits in the first view. Never longer than [`MAX_STEPS`].
pub fn plan_steps(target: f64, step_size: f64) -> Vec<f64> {
    let count = step_count(target, step_size).unwrap_or(MAX_STEPS);
    if count == 1 {
        return vec![0.0];
    }
    (0..count).map(|i| i as f64 * step_size).collect()
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// Runs every step in order. The first failed snapshot aborts the sequence.
pub fn run<P, S, F>(
    page: &mut P,
    snapshots: &mut S,
    ctx: &ScrollContext,
    target: f64,
    config: &CaptureConfig,
    cancel: &CancelFlag,
    mut on_progress: F,
) -> Result<Vec<CaptureFrame>, CaptureError>
where
    P: Page,
    S: SnapshotService + ?Sized,
    F: FnMut(StepProgress),
{
    if target.is_nan() || target <= 0.0 || step_count(target, ctx.step_size).is_none() {
        return Err(CaptureError::InvalidTarget(target));
    }

    let steps = plan_steps(target, ctx.step_size);
    let total = steps.len();
    info!(target, step_size = ctx.step_size, total, "starting capture sequence");

    let mut frames = Vec::with_capacity(total);
    for (index, requested) in steps.into_iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(completed = index, total, "capture cancelled between steps");
            return Err(CaptureError::Cancelled);
        }
        let step = index + 1;
        on_progress(StepProgress { step, total });

        ctx.set_scroll_offset(page, requested);
        for _ in 0..config.settle_frames {
            page.next_frame();
        }
        pause(config.settle_delay());
        let actual = ctx.scroll_offset(&*page);

        let suppression = occlusion::suppress(page, ctx);
        page.next_frame();
        pause(config.paint_delay());

        let shot = snapshots.capture_visible(&*page);
        occlusion::restore(page, suppression);

        let image = shot.map_err(|source| CaptureError::SnapshotFailure { step, source })?;
        debug!(step, requested, actual, bytes = image.len(), "captured frame");
        frames.push(CaptureFrame {
            image,
            offset: actual,
        });
    }

    Ok(frames)
}
