use doc_model::{Document, PageNumber, PageRange, PageSize};

use crate::coords::DocPoint;
use crate::state::ScrollOffset;

/// Default vertical gap between pages, in document units.
pub const DEFAULT_PAGE_GAP: f32 = 16.0;

/// Pages stacked vertically in document units, separated by a fixed gap.
///
/// Because the gap is in document units the whole layout scales linearly with zoom,
/// so one layout serves every zoom level.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    sizes: Vec<PageSize>,
    tops: Vec<f64>,
    bottoms: Vec<f64>,
    page_gap: f64,
    total_height: f64,
    max_page_width: f64,
    max_page_height: f64,
}

impl DocumentLayout {
    pub fn new(document: &Document, page_gap: f32) -> Self {
        let page_gap = page_gap.max(0.0) as f64;
        let mut sizes = Vec::with_capacity(document.page_count() as usize);
        let mut tops = Vec::with_capacity(sizes.capacity());
        let mut bottoms = Vec::with_capacity(sizes.capacity());
        let mut cursor = 0.0;

        for (_, size) in document.pages() {
            tops.push(cursor);
            cursor += size.height as f64;
            bottoms.push(cursor);
            cursor += page_gap;
            sizes.push(size);
        }

        let total_height = bottoms.last().copied().unwrap_or(0.0);
        let max_page_width = sizes.iter().map(|size| size.width as f64).fold(0.0, f64::max);
        let max_page_height = sizes.iter().map(|size| size.height as f64).fold(0.0, f64::max);

        Self { sizes, tops, bottoms, page_gap, total_height, max_page_width, max_page_height }
    }

    pub fn page_count(&self) -> u32 {
        self.sizes.len() as u32
    }

    pub fn page_gap(&self) -> f64 {
        self.page_gap
    }

    pub fn total_height(&self) -> f64 {
        self.total_height
    }

    pub fn max_page_width(&self) -> f64 {
        self.max_page_width
    }

    pub fn max_page_height(&self) -> f64 {
        self.max_page_height
    }

    pub fn page_size(&self, page: PageNumber) -> Option<PageSize> {
        self.index(page).map(|index| self.sizes[index])
    }

    /// Top edge of `page` in continuous document units.
    pub fn page_top(&self, page: PageNumber) -> Option<f64> {
        self.index(page).map(|index| self.tops[index])
    }

    pub fn page_bottom(&self, page: PageNumber) -> Option<f64> {
        self.index(page).map(|index| self.bottoms[index])
    }

    /// Page covering `doc_y`. A point in the gap belongs to the following page; points
    /// past the end belong to the last page.
    pub fn page_at_offset(&self, doc_y: f64) -> Option<PageNumber> {
        if self.sizes.is_empty() {
            return None;
        }
        let index = self.bottoms.partition_point(|bottom| *bottom < doc_y);
        Some(index.min(self.sizes.len() - 1) as PageNumber + 1)
    }

    /// Pages intersecting the viewport band `[scroll_y, scroll_y + height]` (viewport pixels).
    pub fn visible_range(&self, scroll_y: f64, height: f64, scale: f64) -> Option<PageRange> {
        if self.sizes.is_empty() || scale <= 0.0 {
            return None;
        }

        let top = scroll_y.max(0.0) / scale;
        let bottom = (scroll_y.max(0.0) + height.max(0.0)) / scale;

        let first = self.bottoms.partition_point(|edge| *edge < top).min(self.sizes.len() - 1);
        let last = self.tops.partition_point(|edge| *edge <= bottom).saturating_sub(1);

        if last < first {
            return Some(PageRange::single(first as PageNumber + 1));
        }
        Some(PageRange::new(first as PageNumber + 1, last as PageNumber + 1))
    }

    /// Page under the vertical center of the viewport.
    pub fn current_page(&self, scroll_y: f64, height: f64, scale: f64) -> Option<PageNumber> {
        if scale <= 0.0 {
            return None;
        }
        self.page_at_offset((scroll_y.max(0.0) + height.max(0.0) / 2.0) / scale)
    }

    /// Largest scroll offset that keeps a `width`×`height` container inside the document at `scale`.
    pub fn max_scroll(&self, scale: f64, width: f64, height: f64) -> ScrollOffset {
        ScrollOffset::new(
            (self.max_page_width * scale - width).max(0.0),
            (self.total_height * scale - height).max(0.0),
        )
    }

    /// Splits a continuous document point into its page and the page-local point.
    pub fn to_page_local(&self, point: DocPoint) -> Option<(PageNumber, DocPoint)> {
        let page = self.page_at_offset(point.y)?;
        let top = self.page_top(page)?;
        Some((page, DocPoint::new(point.x, point.y - top)))
    }

    pub fn from_page_local(&self, page: PageNumber, point: DocPoint) -> Option<DocPoint> {
        let top = self.page_top(page)?;
        Some(DocPoint::new(point.x, point.y + top))
    }

    fn index(&self, page: PageNumber) -> Option<usize> {
        let index = page.checked_sub(1)? as usize;
        (index < self.sizes.len()).then_some(index)
    }
}
