//! Scrolling capture: find the surface that scrolls, photograph it one
//! viewport at a time with fixed chrome hidden, and stitch the frames into a
//! single image ending at the clicked point.

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod naming;
pub mod occlusion;
pub mod page;
pub mod scene;
pub mod scroll;
pub mod sequencer;
pub mod stitch;
pub mod store;

pub use config::CaptureConfig;
pub use controller::{
    CaptureController, CaptureOutcome, CaptureSession, LogPresenter, Persistence, PointerEvent,
    Presenter, ProcessSlot, SessionSlot, SharedSlot, SlotTicket, Toggle,
};
pub use error::CaptureError;
pub use page::{ElementId, Page};
pub use scene::{Scene, SceneCamera};
pub use scroll::{ScrollContext, ScrollKind};
pub use sequencer::{CancelFlag, CaptureFrame, SnapshotService};
pub use stitch::{StitchRequest, StitchedImage};
pub use store::FileStore;
