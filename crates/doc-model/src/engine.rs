use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{FieldAppearance, FieldId, FieldRect, FieldType, FieldValue, PageNumber, PageSize};

/// Pending rasterization result handed out by a [`DocumentEngine`].
pub type RenderFuture = LocalBoxFuture<'static, Result<Surface, EngineError>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: PageNumber, page_count: u32 },
    #[error("failed to decode page {page}: {reason}")]
    Decode { page: PageNumber, reason: String },
    #[error("rasterization of page {page} was cancelled")]
    Cancelled { page: PageNumber },
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageHandle {
    pub page: PageNumber,
    pub size: PageSize,
}

/// A rasterized RGBA bitmap of one page.
#[derive(Clone, PartialEq)]
pub struct Surface {
    pub page: PageNumber,
    pub width: u32,
    pub height: u32,
    /// Scale the engine was asked to render at.
    pub scale: f32,
    pub pixels: Vec<u8>,
}

impl Surface {
    pub fn new(page: PageNumber, width: u32, height: u32, scale: f32, pixels: Vec<u8>) -> Self {
        Self { page, width, height, scale, pixels }
    }

    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Scale actually delivered, derived from the bitmap width.
    pub fn effective_scale(&self, page_size: PageSize) -> f32 {
        if page_size.width <= 0.0 {
            return self.scale;
        }
        self.width as f32 / page_size.width
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("page", &self.page)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("scale", &self.scale)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Bitmap dimensions for a page rendered at `scale`: `floor(w*s) x floor(h*s)`, at least 1x1.
///
/// Engines must size their surfaces with this so that callers capping the pixel count
/// by scale get the bound they asked for.
pub fn surface_dimensions(size: PageSize, scale: f32) -> (u32, u32) {
    let scale = scale as f64;
    let width = (size.width as f64 * scale).floor().max(1.0) as u32;
    let height = (size.height as f64 * scale).floor().max(1.0) as u32;
    (width, height)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldWidget {
    pub id: FieldId,
    pub page: PageNumber,
    pub rect: FieldRect,
    pub appearance: FieldAppearance,
}

impl FieldWidget {
    pub fn new(id: impl Into<String>, page: PageNumber, rect: FieldRect) -> Self {
        Self { id: FieldId::new(id), page, rect, appearance: FieldAppearance::default() }
    }
}

/// Engine-side description of a named field and all of its widgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub field_type: FieldType,
    pub value: FieldValue,
    pub widgets: Vec<FieldWidget>,
}

/// The document engine owns decoding and layout; the viewer never parses bytes itself.
pub trait DocumentEngine {
    fn page_count(&self) -> u32;

    fn get_page(&self, page: PageNumber) -> Result<PageHandle, EngineError>;

    /// Starts rasterizing `handle` at `scale`. The returned future may complete on a later
    /// turn of the event loop; engines that render off-thread deliver the result through it.
    fn render_page(&self, handle: &PageHandle, scale: f32) -> RenderFuture;

    fn field_objects(&self) -> Result<BTreeMap<String, FieldDescriptor>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_dimensions_floor_and_never_zero() {
        let size = PageSize::new(612.0, 792.0);
        assert_eq!(surface_dimensions(size, 1.0), (612, 792));
        assert_eq!(surface_dimensions(size, 1.5), (918, 1188));
        assert_eq!(surface_dimensions(size, 0.333), (203, 263));
        assert_eq!(surface_dimensions(PageSize::new(1.0, 1.0), 0.01), (1, 1));
    }

    #[test]
    fn effective_scale_comes_from_bitmap_width() {
        let size = PageSize::new(1000.0, 1400.0);
        let surface = Surface::new(5, 1730, 2422, 4.0, Vec::new());
        assert!((surface.effective_scale(size) - 1.73).abs() < 1e-6);
        assert_eq!(surface.pixel_count(), 1730 * 2422);
    }

    #[test]
    fn engine_errors_render_readable_messages() {
        let error = EngineError::PageOutOfRange { page: 9, page_count: 3 };
        assert_eq!(error.to_string(), "page 9 out of range (page_count=3)");
    }
}
