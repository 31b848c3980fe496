//! Hides elements that would cover or repeat across captured frames.

use std::collections::HashSet;
use tracing::debug;

use crate::page::{ElementId, InlineStyle, Page};
use crate::scroll::ScrollContext;

/// One hidden element and the inline `visibility` it had before.
#[derive(Debug, Clone, PartialEq)]
pub struct OcclusionRecord {
    pub element: ElementId,
    pub prior: Option<InlineStyle>,
}

/// Records produced by one [`suppress`] call. Consumed by [`restore`].
#[derive(Debug, Default)]
#[must_use = "suppressed elements stay hidden until the records are restored"]
pub struct Suppression {
    records: Vec<OcclusionRecord>,
}

impl Suppression {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[OcclusionRecord] {
        &self.records
    }

    fn hide<P: Page + ?Sized>(&mut self, page: &mut P, el: ElementId) {
        let prior = page.inline_visibility(el);
        page.set_inline_visibility(el, Some(InlineStyle::forced_hidden()));
        self.records.push(OcclusionRecord { element: el, prior });
    }
}

/// Hides fixed/sticky elements everywhere and, in container mode, siblings
/// along the container's ancestor chain that overlap it vertically.
pub fn suppress<P: Page + ?Sized>(page: &mut P, ctx: &ScrollContext) -> Suppression {
    let mut suppression = Suppression::default();
    let mut hidden: HashSet<ElementId> = HashSet::new();

    for el in page.all_elements() {
        if page.is_injected(el) || !page.position(el).pinned() {
            continue;
        }
        suppression.hide(page, el);
        hidden.insert(el);
    }
    let pinned = suppression.len();

    if let Some(container) = ctx.element {
        let container_rect = page.bounding_rect(container);
        let mut path = container;
        while let Some(ancestor) = page.parent(path) {
            for sibling in page.children(ancestor) {
                if sibling == path || hidden.contains(&sibling) || page.is_injected(sibling) {
                    continue;
                }
                if !page.is_visible(sibling) {
                    continue;
                }
                if page.bounding_rect(sibling).overlaps_vertically(&container_rect) {
                    suppression.hide(page, sibling);
                    hidden.insert(sibling);
                }
            }
            path = ancestor;
        }
    }

    debug!(
        pinned,
        overlapping = suppression.len() - pinned,
        "suppressed occluding elements"
    );
    suppression
}

/// Writes back every prior inline value, in reverse order of hiding.
pub fn restore<P: Page + ?Sized>(page: &mut P, suppression: Suppression) {
    for record in suppression.records.into_iter().rev() {
        page.set_inline_visibility(record.element, record.prior);
    }
}
