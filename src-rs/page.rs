//! Layout queries and mutations the capture pipeline needs from a host page.
//!
//! A real browser tab, a remote-debugging session, or the in-memory [`Scene`](crate::scene::Scene)
//! can all sit behind [`Page`].

use serde::{Deserialize, Serialize};

/// Opaque handle to one element of the host page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub usize);

/// Bounding box in viewport (client) coordinates, CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// True when the two boxes share a band of rows. Zero-area boxes never overlap.
    pub fn overlaps_vertically(&self, other: &Rect) -> bool {
        self.area() > 0.0 && self.bottom() > other.top() && self.top() < other.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Computed `overflow-y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    #[default]
    Visible,
    Hidden,
    Clip,
    Scroll,
    Auto,
    Overlay,
}

impl Overflow {
    /// `hidden` and `clip` stop the surface from scrolling vertically.
    pub fn blocks_scrolling(self) -> bool {
        matches!(self, Overflow::Hidden | Overflow::Clip)
    }

    /// Values that make an element a user-scrollable container.
    pub fn allows_container_scroll(self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll | Overflow::Overlay)
    }

    pub fn clips(self) -> bool {
        !matches!(self, Overflow::Visible)
    }
}

/// Computed `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

impl Position {
    /// Fixed and sticky boxes stay on screen while the content beneath them moves.
    pub fn pinned(self) -> bool {
        matches!(self, Position::Fixed | Position::Sticky)
    }
}

/// An inline `visibility` declaration, including its `!important` priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineStyle {
    pub value: String,
    pub important: bool,
}

impl InlineStyle {
    /// `visibility: hidden !important`, which page stylesheets cannot override.
    pub fn forced_hidden() -> Self {
        Self {
            value: "hidden".to_string(),
            important: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
}

pub trait Page {
    /// The document element (`<html>`).
    fn root(&self) -> ElementId;
    fn body(&self) -> Option<ElementId>;
    fn children(&self, el: ElementId) -> Vec<ElementId>;
    fn parent(&self, el: ElementId) -> Option<ElementId>;
    /// Every element in document order, root included.
    fn all_elements(&self) -> Vec<ElementId>;

    /// Elements the capture tool itself injected (instruction bar, guide line).
    fn is_injected(&self, el: ElementId) -> bool;

    fn overflow_y(&self, el: ElementId) -> Overflow;
    fn position(&self, el: ElementId) -> Position;
    /// Computed visibility after inheritance and inline overrides.
    fn is_visible(&self, el: ElementId) -> bool;
    fn bounding_rect(&self, el: ElementId) -> Rect;
    fn scroll_height(&self, el: ElementId) -> f64;
    fn client_height(&self, el: ElementId) -> f64;
    fn client_width(&self, el: ElementId) -> f64;

    fn viewport(&self) -> Viewport;
    fn document_scroll(&self) -> f64;
    /// Hosts clamp the value to the scrollable range.
    fn set_document_scroll(&mut self, y: f64);
    fn element_scroll(&self, el: ElementId) -> f64;
    fn set_element_scroll(&mut self, el: ElementId, y: f64);

    fn inline_visibility(&self, el: ElementId) -> Option<InlineStyle>;
    /// `None` removes the inline declaration.
    fn set_inline_visibility(&mut self, el: ElementId, style: Option<InlineStyle>);

    /// Blocks until the next rendering-frame boundary.
    fn next_frame(&mut self);
    fn title(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_overlap_requires_shared_rows_and_area() {
        let container = Rect::new(0.0, 100.0, 800.0, 500.0);
        assert!(Rect::new(0.0, 50.0, 100.0, 100.0).overlaps_vertically(&container));
        assert!(!Rect::new(0.0, 0.0, 100.0, 100.0).overlaps_vertically(&container));
        assert!(!Rect::new(0.0, 600.0, 100.0, 10.0).overlaps_vertically(&container));
        assert!(!Rect::new(0.0, 200.0, 0.0, 100.0).overlaps_vertically(&container));
    }

    #[test]
    fn overflow_classes() {
        assert!(Overflow::Hidden.blocks_scrolling());
        assert!(Overflow::Clip.blocks_scrolling());
        assert!(!Overflow::Auto.blocks_scrolling());
        assert!(Overflow::Overlay.allows_container_scroll());
        assert!(!Overflow::Visible.allows_container_scroll());
    }

    #[test]
    fn overflow_parses_lowercase_names() {
        let parsed: Overflow = serde_json::from_str("\"overlay\"").unwrap();
        assert_eq!(parsed, Overflow::Overlay);
        let parsed: Position = serde_json::from_str("\"sticky\"").unwrap();
        assert!(parsed.pinned());
    }
}
