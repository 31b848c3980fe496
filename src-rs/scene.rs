//! An in-memory page described by JSON, and a camera that rasterises it.
//!
//! Scenes let the whole pipeline run without a browser. Layout follows the
//! browser rules the pipeline relies on: scroll offsets clamp to the
//! scrollable range, bounding rects move with every scrolled ancestor, fixed
//! boxes stay pinned to the viewport and visibility inherits.

use anyhow::{bail, Context, Result};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::trace;

use crate::page::{ElementId, InlineStyle, Overflow, Page, Position, Rect, Viewport};
use crate::sequencer::SnapshotService;

const ROOT: ElementId = ElementId(0);
const BODY: ElementId = ElementId(1);

/// Height of one colour band painted on scrolling surfaces, CSS px.
pub const BAND_HEIGHT: f64 = 40.0;

const DOCUMENT_BANDS: [[u8; 3]; 6] = [
    [250, 235, 215],
    [200, 225, 250],
    [215, 245, 200],
    [245, 205, 215],
    [230, 215, 250],
    [250, 245, 190],
];

const CONTAINER_BANDS: [[u8; 3]; 5] = [
    [120, 170, 220],
    [220, 140, 120],
    [130, 200, 150],
    [200, 180, 110],
    [170, 130, 200],
];

const SOLIDS: [[u8; 3]; 6] = [
    [60, 60, 70],
    [90, 110, 140],
    [140, 90, 90],
    [80, 130, 90],
    [150, 140, 70],
    [110, 80, 140],
];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneDef {
    #[serde(default)]
    pub title: String,
    pub viewport: ViewportDef,
    #[serde(default)]
    pub root: RootDef,
    #[serde(default)]
    pub body: BodyDef,
    #[serde(default)]
    pub elements: Vec<ElementDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewportDef {
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_pixel_ratio")]
    pub device_pixel_ratio: f64,
}

fn default_pixel_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootDef {
    #[serde(default)]
    pub overflow_y: Overflow,
    /// Document content height; derived from the top-level elements when absent.
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BodyDef {
    #[serde(default)]
    pub overflow_y: Overflow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementDef {
    pub id: String,
    /// Must name an element listed earlier. Top-level elements hang off `<body>`.
    pub parent: Option<String>,
    /// Relative to the parent's content box, or to the viewport for fixed boxes.
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub h: f64,
    #[serde(default)]
    pub overflow_y: Overflow,
    #[serde(default)]
    pub position: Position,
    /// Scrollable content height of a container.
    pub content_height: Option<f64>,
    #[serde(default)]
    pub injected: bool,
    /// Stylesheet `visibility` (`visible` / `hidden`).
    pub visibility: Option<String>,
    /// Inline `visibility` declaration present before any capture.
    pub visibility_style: Option<InlineStyle>,
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    local: Rect,
    overflow_y: Overflow,
    position: Position,
    content_height: f64,
    injected: bool,
    declared_visible: Option<bool>,
    inline: Option<InlineStyle>,
    scroll_top: f64,
}

impl Node {
    fn surface(name: &str, local: Rect, overflow_y: Overflow) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
            local,
            overflow_y,
            position: Position::Static,
            content_height: local.h,
            injected: false,
            declared_visible: None,
            inline: None,
            scroll_top: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scene {
    title: String,
    viewport: Viewport,
    document_height: f64,
    document_scroll: f64,
    nodes: Vec<Node>,
    names: HashMap<String, ElementId>,
    frames_rendered: u64,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read scene file: {}", path.display()))?;
        let def: SceneDef = serde_json::from_str(&raw)
            .with_context(|| format!("invalid scene JSON: {}", path.display()))?;
        Self::from_def(def)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let def: SceneDef = serde_json::from_value(value).context("invalid scene JSON")?;
        Self::from_def(def)
    }

    pub fn from_def(def: SceneDef) -> Result<Self> {
        let vp = &def.viewport;
        if !(vp.width > 0.0 && vp.height > 0.0) {
            bail!("viewport must have a positive size");
        }
        if !(vp.device_pixel_ratio > 0.0) {
            bail!("device_pixel_ratio must be positive");
        }

        let derived_height = def
            .elements
            .iter()
            .filter(|e| e.parent.is_none() && e.position != Position::Fixed)
            .map(|e| e.y + e.h)
            .fold(vp.height, f64::max);
        let document_height = def.root.height.unwrap_or(derived_height).max(0.0);

        let page_rect = Rect::new(0.0, 0.0, vp.width, document_height);
        let mut root = Node::surface("html", page_rect, def.root.overflow_y);
        root.children.push(BODY);
        let mut body = Node::surface("body", page_rect, def.body.overflow_y);
        body.parent = Some(ROOT);

        let mut nodes = vec![root, body];
        let mut names = HashMap::new();
        names.insert("html".to_string(), ROOT);
        names.insert("body".to_string(), BODY);

        for el in def.elements {
            if names.contains_key(&el.id) {
                bail!("duplicate element id: {}", el.id);
            }
            if el.w < 0.0 || el.h < 0.0 {
                bail!("element {} has a negative size", el.id);
            }
            let parent = match el.parent.as_deref() {
                Some(name) => *names.get(name).with_context(|| {
                    format!("element {} names unknown or later parent {name}", el.id)
                })?,
                None => BODY,
            };
            let declared_visible = match el.visibility.as_deref() {
                None => None,
                Some("visible") => Some(true),
                Some("hidden") | Some("collapse") => Some(false),
                Some(other) => bail!("element {} has unknown visibility {other}", el.id),
            };

            let id = ElementId(nodes.len());
            nodes[parent.0].children.push(id);
            names.insert(el.id.clone(), id);
            nodes.push(Node {
                name: el.id,
                parent: Some(parent),
                children: Vec::new(),
                local: Rect::new(el.x, el.y, el.w, el.h),
                overflow_y: el.overflow_y,
                position: el.position,
                content_height: el.content_height.unwrap_or(el.h).max(el.h),
                injected: el.injected,
                declared_visible,
                inline: el.visibility_style,
                scroll_top: 0.0,
            });
        }

        Ok(Self {
            title: def.title,
            viewport: Viewport {
                width: vp.width,
                height: vp.height,
                device_pixel_ratio: vp.device_pixel_ratio,
            },
            document_height,
            document_scroll: 0.0,
            nodes,
            names,
            frames_rendered: 0,
        })
    }

    pub fn element_by_name(&self, name: &str) -> Option<ElementId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, el: ElementId) -> &str {
        &self.nodes[el.0].name
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    fn is_surface(el: ElementId) -> bool {
        el == ROOT || el == BODY
    }

    /// Viewport position where a child at local (0, 0) lands.
    fn content_origin(&self, el: ElementId) -> (f64, f64) {
        if Self::is_surface(el) {
            return (0.0, -self.document_scroll);
        }
        let rect = self.bounding_rect(el);
        (rect.x, rect.y - self.nodes[el.0].scroll_top)
    }

    fn max_scroll(&self, el: ElementId) -> f64 {
        (self.scroll_height(el) - self.client_height(el)).max(0.0)
    }
}

impl Page for Scene {
    fn root(&self) -> ElementId {
        ROOT
    }

    fn body(&self) -> Option<ElementId> {
        Some(BODY)
    }

    fn children(&self, el: ElementId) -> Vec<ElementId> {
        self.nodes[el.0].children.clone()
    }

    fn parent(&self, el: ElementId) -> Option<ElementId> {
        self.nodes[el.0].parent
    }

    fn all_elements(&self) -> Vec<ElementId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(el) = stack.pop() {
            out.push(el);
            stack.extend(self.nodes[el.0].children.iter().rev().copied());
        }
        out
    }

    fn is_injected(&self, el: ElementId) -> bool {
        self.nodes[el.0].injected
    }

    fn overflow_y(&self, el: ElementId) -> Overflow {
        self.nodes[el.0].overflow_y
    }

    fn position(&self, el: ElementId) -> Position {
        self.nodes[el.0].position
    }

    fn is_visible(&self, el: ElementId) -> bool {
        let mut cursor = Some(el);
        while let Some(current) = cursor {
            let node = &self.nodes[current.0];
            if let Some(style) = &node.inline {
                if style.value != "inherit" {
                    return !matches!(style.value.as_str(), "hidden" | "collapse");
                }
            }
            if let Some(visible) = node.declared_visible {
                return visible;
            }
            cursor = node.parent;
        }
        true
    }

    fn bounding_rect(&self, el: ElementId) -> Rect {
        if Self::is_surface(el) {
            return Rect::new(
                0.0,
                -self.document_scroll,
                self.viewport.width,
                self.document_height,
            );
        }
        let node = &self.nodes[el.0];
        if node.position == Position::Fixed {
            return node.local;
        }
        let (ox, oy) = self.content_origin(node.parent.unwrap_or(BODY));
        Rect::new(ox + node.local.x, oy + node.local.y, node.local.w, node.local.h)
    }

    fn scroll_height(&self, el: ElementId) -> f64 {
        if Self::is_surface(el) {
            return self.document_height;
        }
        self.nodes[el.0].content_height
    }

    fn client_height(&self, el: ElementId) -> f64 {
        match el {
            ROOT => self.viewport.height,
            BODY => self.document_height,
            _ => self.nodes[el.0].local.h,
        }
    }

    fn client_width(&self, el: ElementId) -> f64 {
        if Self::is_surface(el) {
            return self.viewport.width;
        }
        self.nodes[el.0].local.w
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn document_scroll(&self) -> f64 {
        self.document_scroll
    }

    fn set_document_scroll(&mut self, y: f64) {
        let max = (self.document_height - self.viewport.height).max(0.0);
        self.document_scroll = y.clamp(0.0, max);
    }

    fn element_scroll(&self, el: ElementId) -> f64 {
        if Self::is_surface(el) {
            return self.document_scroll;
        }
        self.nodes[el.0].scroll_top
    }

    fn set_element_scroll(&mut self, el: ElementId, y: f64) {
        if Self::is_surface(el) {
            self.set_document_scroll(y);
            return;
        }
        let clamped = if self.nodes[el.0].overflow_y.clips() {
            y.clamp(0.0, self.max_scroll(el))
        } else {
            0.0
        };
        self.nodes[el.0].scroll_top = clamped;
    }

    fn inline_visibility(&self, el: ElementId) -> Option<InlineStyle> {
        self.nodes[el.0].inline.clone()
    }

    fn set_inline_visibility(&mut self, el: ElementId, style: Option<InlineStyle>) {
        self.nodes[el.0].inline = style;
    }

    fn next_frame(&mut self) {
        self.frames_rendered += 1;
    }

    fn title(&self) -> String {
        self.title.clone()
    }
}

/// Band colour of the document surface at content-space `y`.
pub fn document_band(y: f64) -> Rgba<u8> {
    band(&DOCUMENT_BANDS, y)
}

/// Band colour of a scroll container at container content-space `y`.
pub fn container_band(y: f64) -> Rgba<u8> {
    band(&CONTAINER_BANDS, y)
}

fn band(palette: &[[u8; 3]], y: f64) -> Rgba<u8> {
    let index = (y / BAND_HEIGHT).floor() as i64;
    let [r, g, b] = palette[index.rem_euclid(palette.len() as i64) as usize];
    Rgba([r, g, b, 255])
}

pub fn solid_color(el: ElementId) -> Rgba<u8> {
    let [r, g, b] = SOLIDS[el.0 % SOLIDS.len()];
    Rgba([r, g, b, 255])
}

/// Rasterises whatever a [`Page`] currently shows in its viewport.
///
/// Scrolling surfaces get horizontal bands keyed to their content-space Y,
/// other boxes a solid colour per element.
#[derive(Debug, Default)]
pub struct SceneCamera {
    shots: usize,
}

impl SceneCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shots(&self) -> usize {
        self.shots
    }
}

impl SnapshotService for SceneCamera {
    fn capture_visible(&mut self, page: &dyn Page) -> Result<Vec<u8>> {
        let img = render_viewport(page);
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .context("failed to encode viewport snapshot")?;
        self.shots += 1;
        trace!(shot = self.shots, bytes = out.len(), "rendered viewport");
        Ok(out)
    }
}

pub fn render_viewport(page: &dyn Page) -> RgbaImage {
    let vp = page.viewport();
    let dpr = vp.device_pixel_ratio;
    let width = (vp.width * dpr).round() as u32;
    let height = (vp.height * dpr).round() as u32;
    let mut img = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    let scroll = page.document_scroll();
    for row in 0..height {
        let color = document_band(row as f64 / dpr + scroll);
        for col in 0..width {
            img.put_pixel(col, row, color);
        }
    }

    let viewport_rect = Rect::new(0.0, 0.0, vp.width, vp.height);
    let root = page.root();
    let body = page.body();
    let (fixed, flow): (Vec<ElementId>, Vec<ElementId>) = page
        .all_elements()
        .into_iter()
        .filter(|el| *el != root && Some(*el) != body)
        .partition(|el| page.position(*el) == Position::Fixed);

    for el in flow.into_iter().chain(fixed) {
        if !page.is_visible(el) {
            continue;
        }
        let rect = page.bounding_rect(el);
        let Some(clip) = clip_rect(page, el, viewport_rect) else {
            continue;
        };
        let Some(visible) = rect.intersect(&clip) else {
            continue;
        };

        let scrolls = page.overflow_y(el).allows_container_scroll()
            && page.scroll_height(el) > page.client_height(el);
        let element_scroll = page.element_scroll(el);
        let solid = solid_color(el);

        let row0 = (visible.top() * dpr).round().max(0.0) as u32;
        let row1 = ((visible.bottom() * dpr).round() as u32).min(height);
        let col0 = (visible.x * dpr).round().max(0.0) as u32;
        let col1 = ((visible.right() * dpr).round() as u32).min(width);
        for row in row0..row1 {
            let color = if scrolls {
                container_band(row as f64 / dpr - rect.top() + element_scroll)
            } else {
                solid
            };
            for col in col0..col1 {
                img.put_pixel(col, row, color);
            }
        }
    }
    img
}

/// The viewport narrowed by every clipping ancestor between `el` and the body.
fn clip_rect(page: &dyn Page, el: ElementId, viewport: Rect) -> Option<Rect> {
    let mut clip = viewport;
    if page.position(el) == Position::Fixed {
        return Some(clip);
    }
    let mut cursor = page.parent(el);
    while let Some(ancestor) = cursor {
        if ancestor == page.root() || Some(ancestor) == page.body() {
            break;
        }
        if page.overflow_y(ancestor).clips() {
            clip = clip.intersect(&page.bounding_rect(ancestor))?;
        }
        cursor = page.parent(ancestor);
    }
    Some(clip)
}
