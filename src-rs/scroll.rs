//! Decides which surface owns vertical scrolling.
//!
//! Many layouts pin the document to the viewport and scroll an inner region
//! instead. Capturing such a page by scrolling the document would photograph
//! the same viewport over and over, so the resolver looks for the inner
//! container when the document itself cannot move.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::page::{ElementId, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollKind {
    Document,
    Container,
}

/// The surface a capture session scrolls. Resolved once per session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrollContext {
    pub kind: ScrollKind,
    /// Present only for [`ScrollKind::Container`].
    pub element: Option<ElementId>,
    /// Distance from the top of the viewport to the scrolling surface's visible top edge.
    pub viewport_offset: f64,
    /// Visible scrollable height covered by one step.
    pub step_size: f64,
}

impl ScrollContext {
    pub fn document(step_size: f64) -> Self {
        Self {
            kind: ScrollKind::Document,
            element: None,
            viewport_offset: 0.0,
            step_size,
        }
    }

    pub fn container(element: ElementId, viewport_offset: f64, step_size: f64) -> Self {
        Self {
            kind: ScrollKind::Container,
            element: Some(element),
            viewport_offset,
            step_size,
        }
    }

    pub fn scroll_offset<P: Page + ?Sized>(&self, page: &P) -> f64 {
        match self.element {
            Some(el) => page.element_scroll(el),
            None => page.document_scroll(),
        }
    }

    pub fn set_scroll_offset<P: Page + ?Sized>(&self, page: &mut P, y: f64) {
        match self.element {
            Some(el) => page.set_element_scroll(el, y),
            None => page.set_document_scroll(y),
        }
    }

    /// Full scrollable height of this surface.
    pub fn content_height<P: Page + ?Sized>(&self, page: &P) -> f64 {
        page.scroll_height(self.element.unwrap_or_else(|| page.root()))
    }

    /// Maps a pointer's viewport Y to a content-space Y on this surface.
    pub fn target_y<P: Page + ?Sized>(&self, page: &P, client_y: f64) -> f64 {
        client_y - self.viewport_offset + self.scroll_offset(page)
    }
}

/// Inspects the current layout. Reads only.
pub fn resolve<P: Page + ?Sized>(page: &P, config: &CaptureConfig) -> ScrollContext {
    let viewport = page.viewport();

    if document_scrolls(page, config) {
        info!(step = viewport.height, "document owns scrolling");
        return ScrollContext::document(viewport.height);
    }

    match find_scroll_container(page, config) {
        Some(el) => {
            let rect = page.bounding_rect(el);
            let step = page.client_height(el);
            info!(
                element = el.0,
                top = rect.top(),
                step,
                "inner container owns scrolling"
            );
            ScrollContext::container(el, rect.top(), step)
        }
        None => {
            debug!("no scroll container found; falling back to the document");
            ScrollContext::document(viewport.height)
        }
    }
}

fn document_scrolls<P: Page + ?Sized>(page: &P, config: &CaptureConfig) -> bool {
    let root = page.root();
    let root_blocks = page.overflow_y(root).blocks_scrolling();
    let body_blocks = page
        .body()
        .map(|body| page.overflow_y(body).blocks_scrolling())
        .unwrap_or(false);
    if root_blocks && body_blocks {
        return false;
    }
    page.scroll_height(root) > page.viewport().height + config.document_slack_px
}

/// Breadth-first search under `<body>` for the largest usable scroll container.
pub fn find_scroll_container<P: Page + ?Sized>(
    page: &P,
    config: &CaptureConfig,
) -> Option<ElementId> {
    let body = page.body()?;

    let mut queue: VecDeque<ElementId> = VecDeque::new();
    let mut enqueued = 0usize;
    let mut visited = 0usize;
    let mut best: Option<(ElementId, f64)> = None;

    for child in page.children(body) {
        if enqueued >= config.max_enqueued_nodes {
            break;
        }
        queue.push_back(child);
        enqueued += 1;
    }

    while let Some(el) = queue.pop_front() {
        if visited >= config.max_visited_nodes {
            debug!(visited, enqueued, "scroll container search budget exhausted");
            break;
        }
        visited += 1;

        if page.is_injected(el) {
            continue;
        }

        let client_h = page.client_height(el);
        let qualifies = page.overflow_y(el).allows_container_scroll()
            && page.scroll_height(el) > client_h + config.container_overflow_px
            && client_h > config.container_min_height_px;
        if qualifies {
            let area = client_h * page.client_width(el);
            if best.map_or(true, |(_, best_area)| area > best_area) {
                best = Some((el, area));
            }
        }

        for child in page.children(el) {
            if enqueued >= config.max_enqueued_nodes {
                break;
            }
            queue.push_back(child);
            enqueued += 1;
        }
    }

    best.map(|(el, _)| el)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;
    use serde_json::json;

    fn scene(value: serde_json::Value) -> Scene {
        Scene::from_value(value).unwrap()
    }

    #[test]
    fn tall_document_resolves_to_document() {
        let page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 4000}
        }));
        let ctx = resolve(&page, &CaptureConfig::immediate());
        assert_eq!(ctx.kind, ScrollKind::Document);
        assert_eq!(ctx.step_size, 800.0);
        assert_eq!(ctx.viewport_offset, 0.0);
        assert!(ctx.element.is_none());
    }

    #[test]
    fn overflow_within_slack_is_not_scrollable() {
        let page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 840},
            "elements": [
                {"id": "main", "x": 0, "y": 100, "w": 1000, "h": 700,
                 "overflow_y": "auto", "content_height": 3000}
            ]
        }));
        let ctx = resolve(&page, &CaptureConfig::immediate());
        assert_eq!(ctx.kind, ScrollKind::Container);
        assert_eq!(ctx.element, page.element_by_name("main"));
        assert_eq!(ctx.viewport_offset, 100.0);
        assert_eq!(ctx.step_size, 700.0);
    }

    #[test]
    fn hidden_root_and_body_force_container_search() {
        let page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 4000, "overflow_y": "hidden"},
            "body": {"overflow_y": "clip"},
            "elements": [
                {"id": "pane", "x": 0, "y": 0, "w": 500, "h": 800,
                 "overflow_y": "scroll", "content_height": 2000}
            ]
        }));
        let ctx = resolve(&page, &CaptureConfig::immediate());
        assert_eq!(ctx.kind, ScrollKind::Container);
    }

    #[test]
    fn largest_visible_area_wins_and_ties_keep_first() {
        let page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 800},
            "elements": [
                {"id": "left", "x": 0, "y": 0, "w": 300, "h": 800,
                 "overflow_y": "auto", "content_height": 5000},
                {"id": "right", "x": 300, "y": 0, "w": 700, "h": 800,
                 "overflow_y": "auto", "content_height": 1200},
                {"id": "twin", "x": 300, "y": 0, "w": 700, "h": 800,
                 "overflow_y": "overlay", "content_height": 1200}
            ]
        }));
        let found = find_scroll_container(&page, &CaptureConfig::immediate());
        assert_eq!(found, page.element_by_name("right"));
    }

    #[test]
    fn small_or_barely_overflowing_candidates_are_skipped() {
        let page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 800},
            "elements": [
                {"id": "tiny", "x": 0, "y": 0, "w": 1000, "h": 90,
                 "overflow_y": "auto", "content_height": 900},
                {"id": "flush", "x": 0, "y": 100, "w": 1000, "h": 600,
                 "overflow_y": "auto", "content_height": 605},
                {"id": "plain", "x": 0, "y": 100, "w": 1000, "h": 600,
                 "content_height": 2000}
            ]
        }));
        assert_eq!(find_scroll_container(&page, &CaptureConfig::immediate()), None);
        assert_eq!(
            resolve(&page, &CaptureConfig::immediate()).kind,
            ScrollKind::Document
        );
    }

    #[test]
    fn injected_elements_are_never_candidates() {
        let page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 800},
            "elements": [
                {"id": "tool-bar", "x": 0, "y": 0, "w": 1000, "h": 400, "injected": true,
                 "overflow_y": "auto", "content_height": 900}
            ]
        }));
        assert_eq!(find_scroll_container(&page, &CaptureConfig::immediate()), None);
    }

    #[test]
    fn nested_container_found_within_budget_only() {
        let page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 800},
            "elements": [
                {"id": "shell", "x": 0, "y": 0, "w": 1000, "h": 800},
                {"id": "a", "parent": "shell", "x": 0, "y": 0, "w": 1000, "h": 50},
                {"id": "b", "parent": "shell", "x": 0, "y": 50, "w": 1000, "h": 750},
                {"id": "feed", "parent": "b", "x": 0, "y": 0, "w": 1000, "h": 750,
                 "overflow_y": "auto", "content_height": 4000}
            ]
        }));
        let config = CaptureConfig::immediate();
        assert_eq!(
            find_scroll_container(&page, &config),
            page.element_by_name("feed")
        );

        let starved = CaptureConfig {
            max_visited_nodes: 3,
            ..CaptureConfig::immediate()
        };
        assert_eq!(find_scroll_container(&page, &starved), None);
    }

    #[test]
    fn target_y_maps_client_coordinates_into_content_space() {
        let mut page = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 800},
            "elements": [
                {"id": "main", "x": 0, "y": 120, "w": 1000, "h": 600,
                 "overflow_y": "auto", "content_height": 3000}
            ]
        }));
        let ctx = resolve(&page, &CaptureConfig::immediate());
        ctx.set_scroll_offset(&mut page, 400.0);
        assert_eq!(ctx.scroll_offset(&page), 400.0);
        assert_eq!(ctx.target_y(&page, 320.0), 600.0);
        assert_eq!(ctx.content_height(&page), 3000.0);

        let mut doc = scene(json!({
            "viewport": {"width": 1000, "height": 800},
            "root": {"height": 4000}
        }));
        let ctx = resolve(&doc, &CaptureConfig::immediate());
        ctx.set_scroll_offset(&mut doc, 1000.0);
        assert_eq!(ctx.target_y(&doc, 50.0), 1050.0);
        assert_eq!(ctx.content_height(&doc), 4000.0);
    }
}
