use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

mod engine;
mod forms;
pub mod synthetic;

pub use engine::{
    surface_dimensions, DocumentEngine, EngineError, FieldDescriptor, FieldWidget, PageHandle,
    RenderFuture, Surface,
};
pub use forms::{
    AssignedRolePolicy, ContextRole, FieldVisibilityPolicy, FormDataStore, MemoryFormStore,
    ShowAllFields,
};

/// 1-based page number.
pub type PageNumber = u32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self { width: 612.0, height: 792.0 }
    }
}

/// Page geometry of a loaded document. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pages: Vec<PageSize>,
}

impl Document {
    pub fn new(pages: Vec<PageSize>) -> Self {
        Self { pages }
    }

    pub fn uniform(page_count: u32, size: PageSize) -> Self {
        Self { pages: vec![size; page_count as usize] }
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, page: PageNumber) -> Option<PageSize> {
        let index = page.checked_sub(1)?;
        self.pages.get(index as usize).copied()
    }

    pub fn pages(&self) -> impl Iterator<Item = (PageNumber, PageSize)> + '_ {
        self.pages.iter().enumerate().map(|(index, size)| (index as PageNumber + 1, *size))
    }

    pub fn max_page_width(&self) -> f32 {
        self.pages.iter().map(|size| size.width).fold(0.0, f32::max)
    }

    pub fn all_pages(&self) -> Option<PageRange> {
        (!self.pages.is_empty()).then(|| PageRange::new(1, self.page_count()))
    }
}

/// Inclusive range of 1-based page numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRange {
    pub first: PageNumber,
    pub last: PageNumber,
}

impl PageRange {
    pub fn new(first: PageNumber, last: PageNumber) -> Self {
        Self { first: first.min(last), last: first.max(last) }
    }

    pub fn single(page: PageNumber) -> Self {
        Self { first: page, last: page }
    }

    pub fn contains(&self, page: PageNumber) -> bool {
        page >= self.first && page <= self.last
    }

    pub fn page_count(&self) -> u32 {
        self.last - self.first + 1
    }

    /// Widens the range by `margin` pages on each side, bounded to `1..=page_count`.
    pub fn expand(&self, margin: u32, page_count: u32) -> Self {
        let first = self.first.saturating_sub(margin).max(1);
        let last = self.last.saturating_add(margin).min(page_count.max(1));
        Self::new(first.min(last), last)
    }

    /// Number of pages between `page` and the nearest end of the range; 0 inside.
    pub fn distance(&self, page: PageNumber) -> u32 {
        if page < self.first {
            self.first - page
        } else if page > self.last {
            page - self.last
        } else {
            0
        }
    }

    pub fn iter(&self) -> RangeInclusive<PageNumber> {
        self.first..=self.last
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field rectangle `[x1, y1, x2, y2]` in page-local document units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl FieldRect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Returns the rectangle with `x1 <= x2` and `y1 <= y2`.
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).abs()
    }
}

impl From<[f32; 4]> for FieldRect {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Checkbox,
    Radio,
    Choice,
    Signature,
    Button,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Checked(bool),
    Choices(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldAppearance {
    pub font_size: Option<f32>,
    pub read_only: bool,
    pub required: bool,
    pub multiline: bool,
}

/// One widget of a form field, as positioned on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub id: FieldId,
    pub name: String,
    pub page: PageNumber,
    pub rect: FieldRect,
    pub field_type: FieldType,
    pub value: FieldValue,
    pub appearance: FieldAppearance,
}

/// Flattens engine field descriptors (name -> widgets) into one `FormField` per widget,
/// ordered by page and then by widget id.
pub fn form_fields(descriptors: &BTreeMap<String, FieldDescriptor>) -> Vec<FormField> {
    let mut fields: Vec<FormField> = descriptors
        .iter()
        .flat_map(|(name, descriptor)| {
            descriptor.widgets.iter().map(move |widget| FormField {
                id: widget.id.clone(),
                name: name.clone(),
                page: widget.page,
                rect: widget.rect,
                field_type: descriptor.field_type,
                value: descriptor.value.clone(),
                appearance: widget.appearance.clone(),
            })
        })
        .collect();

    fields.sort_by(|a, b| a.page.cmp(&b.page).then_with(|| a.id.cmp(&b.id)));
    fields
}
