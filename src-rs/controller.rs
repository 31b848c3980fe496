//! Session lifecycle: activation, the capturing click, and teardown.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::naming;
use crate::page::{ElementId, Page};
use crate::scroll::{self, ScrollContext};
use crate::sequencer::{self, CancelFlag, SnapshotService};
use crate::stitch::{self, StitchRequest, StitchedImage};

/// Saves the final image under a suggested human-readable name.
pub trait Persistence {
    fn persist(&mut self, image: &StitchedImage, suggested_name: &str) -> anyhow::Result<PathBuf>;
}

/// The tool's own on-page chrome: instruction bar, guide line, progress text.
pub trait Presenter {
    fn show_instructions(&mut self);
    /// Take the chrome out of the way before the first snapshot.
    fn hide_for_capture(&mut self);
    fn progress(&mut self, text: &str);
    /// Remove all chrome. Called once per session.
    fn dismiss(&mut self);
}

/// Reports progress through the log instead of on-page chrome.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show_instructions(&mut self) {
        info!("click anywhere to capture down to that point; toggle again to cancel");
    }

    fn hide_for_capture(&mut self) {}

    fn progress(&mut self, text: &str) {
        info!("{text}");
    }

    fn dismiss(&mut self) {
        debug!("presenter dismissed");
    }
}

/// Proof that a controller holds a [`SessionSlot`]. Revoked when another
/// activation stops the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTicket(u64);

/// Answers "is a session already running" for whoever shares it, and lets a
/// second activation turn that session off.
pub trait SessionSlot {
    /// Claims the slot; `None` while another session holds it.
    fn try_acquire(&self) -> Option<SlotTicket>;
    /// Revokes the holder's ticket if its session is still awaiting a click.
    /// False when the slot is free or its holder is capturing.
    fn request_stop(&self) -> bool;
    /// Marks the holder as capturing; false once the ticket was revoked.
    fn begin_capture(&self, ticket: SlotTicket) -> bool;
    fn holds(&self, ticket: SlotTicket) -> bool;
    /// Frees the slot if `ticket` still holds it.
    fn release(&self, ticket: SlotTicket);
    fn is_held(&self) -> bool;
}

#[derive(Debug)]
struct SlotState {
    holder: Option<u64>,
    capturing: bool,
    issued: u64,
}

/// The lock behind both slot kinds.
#[derive(Debug)]
struct SlotCell(Mutex<SlotState>);

impl SlotCell {
    const fn new() -> Self {
        Self(Mutex::new(SlotState {
            holder: None,
            capturing: false,
            issued: 0,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> Option<SlotTicket> {
        let mut state = self.lock();
        if state.holder.is_some() {
            return None;
        }
        state.issued += 1;
        state.holder = Some(state.issued);
        state.capturing = false;
        Some(SlotTicket(state.issued))
    }

    fn request_stop(&self) -> bool {
        let mut state = self.lock();
        if state.holder.is_none() || state.capturing {
            return false;
        }
        state.holder = None;
        true
    }

    fn begin_capture(&self, ticket: SlotTicket) -> bool {
        let mut state = self.lock();
        if state.holder != Some(ticket.0) {
            return false;
        }
        state.capturing = true;
        true
    }

    fn holds(&self, ticket: SlotTicket) -> bool {
        self.lock().holder == Some(ticket.0)
    }

    fn release(&self, ticket: SlotTicket) {
        let mut state = self.lock();
        if state.holder == Some(ticket.0) {
            state.holder = None;
            state.capturing = false;
        }
    }

    fn is_held(&self) -> bool {
        self.lock().holder.is_some()
    }
}

static PROCESS_SESSION: SlotCell = SlotCell::new();

/// One session per process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSlot;

impl SessionSlot for ProcessSlot {
    fn try_acquire(&self) -> Option<SlotTicket> {
        PROCESS_SESSION.try_acquire()
    }

    fn request_stop(&self) -> bool {
        PROCESS_SESSION.request_stop()
    }

    fn begin_capture(&self, ticket: SlotTicket) -> bool {
        PROCESS_SESSION.begin_capture(ticket)
    }

    fn holds(&self, ticket: SlotTicket) -> bool {
        PROCESS_SESSION.holds(ticket)
    }

    fn release(&self, ticket: SlotTicket) {
        PROCESS_SESSION.release(ticket)
    }

    fn is_held(&self) -> bool {
        PROCESS_SESSION.is_held()
    }
}

/// One session among the controllers holding clones of this slot.
#[derive(Debug, Clone)]
pub struct SharedSlot(Arc<SlotCell>);

impl SharedSlot {
    pub fn new() -> Self {
        Self(Arc::new(SlotCell::new()))
    }
}

impl Default for SharedSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSlot for SharedSlot {
    fn try_acquire(&self) -> Option<SlotTicket> {
        self.0.try_acquire()
    }

    fn request_stop(&self) -> bool {
        self.0.request_stop()
    }

    fn begin_capture(&self, ticket: SlotTicket) -> bool {
        self.0.begin_capture(ticket)
    }

    fn holds(&self, ticket: SlotTicket) -> bool {
        self.0.holds(ticket)
    }

    fn release(&self, ticket: SlotTicket) {
        self.0.release(ticket)
    }

    fn is_held(&self) -> bool {
        self.0.is_held()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureSession {
    Inactive,
    ActiveAwaitingClick,
    Capturing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Started,
    /// This session, or the one another controller held, was turned off.
    Stopped,
    /// Triggers are ignored while capturing.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    /// Viewport Y of the click, CSS px.
    pub client_y: f64,
    pub target: Option<ElementId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    pub context: ScrollContext,
    pub target: f64,
    pub frame_offsets: Vec<f64>,
    pub width: u32,
    pub height: u32,
    pub title: String,
}

pub struct CaptureController<R: Presenter, L: SessionSlot = ProcessSlot> {
    config: CaptureConfig,
    state: CaptureSession,
    presenter: R,
    slot: L,
    ticket: Option<SlotTicket>,
    cancel: CancelFlag,
}

impl<R: Presenter, L: SessionSlot> CaptureController<R, L> {
    pub fn new(config: CaptureConfig, presenter: R, slot: L) -> Self {
        Self {
            config,
            state: CaptureSession::Inactive,
            presenter,
            slot,
            ticket: None,
            cancel: CancelFlag::new(),
        }
    }

    /// A session stopped by another activation reads as inactive.
    pub fn state(&self) -> CaptureSession {
        if self.stopped_elsewhere() {
            CaptureSession::Inactive
        } else {
            self.state
        }
    }

    pub fn presenter(&self) -> &R {
        &self.presenter
    }

    /// Handle for requesting cancellation while a capture runs.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// The activation trigger: starts a session, or ends one awaiting its click.
    pub fn toggle(&mut self) -> Toggle {
        self.sync_with_slot();
        match self.state {
            CaptureSession::Inactive => {
                let Some(ticket) = self.slot.try_acquire() else {
                    if self.slot.request_stop() {
                        info!("stopped the capture session awaiting its click");
                        return Toggle::Stopped;
                    }
                    debug!("toggle ignored while another session is capturing");
                    return Toggle::Ignored;
                };
                self.ticket = Some(ticket);
                self.cancel.reset();
                self.state = CaptureSession::ActiveAwaitingClick;
                self.presenter.show_instructions();
                info!("capture session started");
                Toggle::Started
            }
            CaptureSession::ActiveAwaitingClick => {
                self.end_session();
                Toggle::Stopped
            }
            CaptureSession::Capturing => {
                debug!("toggle ignored while capturing");
                Toggle::Ignored
            }
        }
    }

    /// Explicit cancel. While capturing it takes effect between steps.
    pub fn cancel(&mut self) {
        self.sync_with_slot();
        match self.state {
            CaptureSession::Inactive => {}
            CaptureSession::ActiveAwaitingClick => self.end_session(),
            CaptureSession::Capturing => self.cancel.cancel(),
        }
    }

    /// The capturing click. Returns `Ok(None)` when the click is not one the
    /// session acts on. Whatever happens, the page's scroll offset is put back
    /// and the session ends.
    pub fn click<P, S, W>(
        &mut self,
        page: &mut P,
        snapshots: &mut S,
        store: &mut W,
        event: PointerEvent,
    ) -> Result<Option<CaptureOutcome>, CaptureError>
    where
        P: Page,
        S: SnapshotService + ?Sized,
        W: Persistence + ?Sized,
    {
        self.sync_with_slot();
        if self.state != CaptureSession::ActiveAwaitingClick {
            debug!(state = ?self.state, "click ignored");
            return Ok(None);
        }
        if let Some(target) = event.target {
            if on_chrome(&*page, target) {
                debug!("click on capture chrome ignored");
                return Ok(None);
            }
        }

        let claimed = self
            .ticket
            .map_or(false, |ticket| self.slot.begin_capture(ticket));
        if !claimed {
            self.end_session();
            return Ok(None);
        }
        self.state = CaptureSession::Capturing;
        self.presenter.hide_for_capture();

        let ctx = scroll::resolve(&*page, &self.config);
        let original = ctx.scroll_offset(&*page);
        let requested = ctx.target_y(&*page, event.client_y);
        let target = requested.min(ctx.content_height(&*page));
        info!(kind = ?ctx.kind, original, target, "capture requested");
        if target < requested {
            debug!(requested, target, "target capped at the end of the content");
        }

        let in_viewport = (0.0..=page.viewport().height).contains(&event.client_y);
        let result = if in_viewport {
            self.capture(page, snapshots, store, &ctx, target)
        } else {
            Err(CaptureError::InvalidTarget(requested))
        };
        ctx.set_scroll_offset(page, original);

        match &result {
            Ok(outcome) => {
                self.presenter
                    .progress(&format!("Saved {}", outcome.path.display()));
            }
            Err(err) => {
                warn!(error = %err, "capture failed");
                self.presenter.progress(err.user_message());
                let dwell = err.dwell(&self.config);
                if !dwell.is_zero() {
                    thread::sleep(dwell);
                }
            }
        }
        self.end_session();
        result.map(Some)
    }

    fn capture<P, S, W>(
        &mut self,
        page: &mut P,
        snapshots: &mut S,
        store: &mut W,
        ctx: &ScrollContext,
        target: f64,
    ) -> Result<CaptureOutcome, CaptureError>
    where
        P: Page,
        S: SnapshotService + ?Sized,
        W: Persistence + ?Sized,
    {
        if target.is_nan() || target <= 0.0 {
            return Err(CaptureError::InvalidTarget(target));
        }

        let presenter = &mut self.presenter;
        let frames = sequencer::run(
            page,
            snapshots,
            ctx,
            target,
            &self.config,
            &self.cancel,
            |p| presenter.progress(&format!("Capturing {}/{}", p.step, p.total)),
        )?;
        if self.cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        self.presenter.progress("Stitching");
        let viewport = page.viewport();
        let request = StitchRequest::new(ctx, target, viewport.width, viewport.device_pixel_ratio);
        let image = stitch::stitch(&frames, &request)?.ok_or(CaptureError::NoFrames)?;

        let title = page.title();
        let name = naming::suggested_file_name(&title, self.config.max_title_chars, Utc::now());
        self.presenter.progress("Saving");
        let path = store
            .persist(&image, &name)
            .map_err(CaptureError::PersistenceFailure)?;

        Ok(CaptureOutcome {
            path,
            context: ctx.clone(),
            target,
            frame_offsets: frames.iter().map(|f| f.offset).collect(),
            width: image.width,
            height: image.height,
            title,
        })
    }

    fn stopped_elsewhere(&self) -> bool {
        self.state == CaptureSession::ActiveAwaitingClick
            && self
                .ticket
                .map_or(true, |ticket| !self.slot.holds(ticket))
    }

    /// Ends a session whose slot was taken back by another activation.
    fn sync_with_slot(&mut self) {
        if self.stopped_elsewhere() {
            info!("capture session stopped by another activation");
            self.end_session();
        }
    }

    /// Idempotent; only the first call after activation does anything.
    fn end_session(&mut self) {
        if self.state == CaptureSession::Inactive {
            return;
        }
        self.state = CaptureSession::Inactive;
        self.cancel.reset();
        if let Some(ticket) = self.ticket.take() {
            self.slot.release(ticket);
        }
        self.presenter.dismiss();
        info!("capture session ended");
    }
}

impl<R: Presenter, L: SessionSlot> Drop for CaptureController<R, L> {
    fn drop(&mut self) {
        self.end_session();
    }
}

fn on_chrome<P: Page + ?Sized>(page: &P, el: ElementId) -> bool {
    let mut cursor = Some(el);
    while let Some(current) = cursor {
        if page.is_injected(current) {
            return true;
        }
        cursor = page.parent(current);
    }
    false
}
