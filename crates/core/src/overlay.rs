//! Form field overlays
//!
//! Interactive form controls are drawn by the host above the rendered
//! pages. The synchronizer decides which fields get an element (visible by
//! policy and on a resident page) and keeps each element's geometry in step
//! with the zoom. Field values are never held here: edits go straight to the
//! form-data store.

use doc_model::{
    ContextRole, FieldId, FieldValue, FieldVisibilityPolicy, FormDataStore, FormField, PageNumber,
};
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use viewer_core::{overlay_rect, OverlayRect, SharedViewport};

use crate::scroller::ScrollerEvent;

/// Handle of an overlay element managed by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Host that owns the actual overlay elements
pub trait OverlayHost {
    /// Create an element for `field`, showing `value`
    fn mount(&self, element: ElementId, field: &FormField, value: &FieldValue);

    /// Position an element relative to the top-left corner of its page node
    fn place(&self, element: ElementId, page: PageNumber, rect: OverlayRect);

    fn unmount(&self, element: ElementId);
}

/// Element state as seen by [`RecordingOverlayHost`]
#[derive(Debug, Clone, PartialEq)]
pub struct MountedElement {
    pub field_id: FieldId,
    pub field_name: String,
    pub page: PageNumber,
    pub value: FieldValue,
    pub rect: Option<OverlayRect>,
}

/// Overlay host that keeps elements in memory; used headless and in tests
#[derive(Debug, Default)]
pub struct RecordingOverlayHost {
    elements: RefCell<BTreeMap<ElementId, MountedElement>>,
    mounts: Cell<usize>,
    placements: Cell<usize>,
}

impl RecordingOverlayHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(&self, element: ElementId) -> Option<MountedElement> {
        self.elements.borrow().get(&element).cloned()
    }

    /// Mounted element showing `field_id`
    pub fn element_for_field(&self, field_id: &FieldId) -> Option<MountedElement> {
        self.elements.borrow().values().find(|element| &element.field_id == field_id).cloned()
    }

    pub fn mounted_count(&self) -> usize {
        self.elements.borrow().len()
    }

    /// Total mount calls received
    pub fn mount_count(&self) -> usize {
        self.mounts.get()
    }

    /// Total place calls received
    pub fn placement_count(&self) -> usize {
        self.placements.get()
    }
}

impl OverlayHost for RecordingOverlayHost {
    fn mount(&self, element: ElementId, field: &FormField, value: &FieldValue) {
        self.mounts.set(self.mounts.get() + 1);
        self.elements.borrow_mut().insert(
            element,
            MountedElement {
                field_id: field.id.clone(),
                field_name: field.name.clone(),
                page: field.page,
                value: value.clone(),
                rect: None,
            },
        );
    }

    fn place(&self, element: ElementId, page: PageNumber, rect: OverlayRect) {
        self.placements.set(self.placements.get() + 1);
        if let Some(mounted) = self.elements.borrow_mut().get_mut(&element) {
            mounted.page = page;
            mounted.rect = Some(rect);
        }
    }

    fn unmount(&self, element: ElementId) {
        self.elements.borrow_mut().remove(&element);
    }
}

/// Keeps overlay elements aligned with resident pages
pub struct FormOverlaySynchronizer {
    host: Rc<dyn OverlayHost>,
    store: Rc<dyn FormDataStore>,
    policy: Rc<dyn FieldVisibilityPolicy>,
    role: ContextRole,
    viewport: SharedViewport,
    /// Fields that passed the visibility policy
    fields: Vec<FormField>,
    hidden: usize,
    by_page: BTreeMap<PageNumber, Vec<usize>>,
    resident: BTreeSet<PageNumber>,
    elements: HashMap<ElementId, usize>,
    mounted: HashMap<usize, ElementId>,
    next_element: u64,
}

impl FormOverlaySynchronizer {
    pub fn new(
        host: Rc<dyn OverlayHost>,
        store: Rc<dyn FormDataStore>,
        policy: Rc<dyn FieldVisibilityPolicy>,
        role: ContextRole,
        viewport: SharedViewport,
    ) -> Self {
        Self {
            host,
            store,
            policy,
            role,
            viewport,
            fields: Vec::new(),
            hidden: 0,
            by_page: BTreeMap::new(),
            resident: BTreeSet::new(),
            elements: HashMap::new(),
            mounted: HashMap::new(),
            next_element: 0,
        }
    }

    pub fn role(&self) -> &ContextRole {
        &self.role
    }

    /// Replace the field set
    ///
    /// The visibility policy runs once per field here. Every element is
    /// unmounted and fields on resident pages are mounted again.
    pub fn set_fields(&mut self, fields: Vec<FormField>) {
        self.unmount_all();

        let total = fields.len();
        self.fields = fields
            .into_iter()
            .filter(|field| !self.policy.should_hide_field(field, &self.role))
            .collect();
        self.hidden = total - self.fields.len();

        self.by_page.clear();
        for (index, field) in self.fields.iter().enumerate() {
            self.by_page.entry(field.page).or_default().push(index);
        }
        debug!("overlay field set: {} visible, {} hidden for role {}", self.fields.len(), self.hidden, self.role);

        let resident: Vec<_> = self.resident.iter().copied().collect();
        for page in resident {
            self.mount_page(page);
        }
    }

    /// Mount the fields of a page whose surface became available
    pub fn on_page_resident(&mut self, page: PageNumber) {
        if self.resident.insert(page) {
            self.mount_page(page);
        }
    }

    /// Unmount the fields of a page that lost its surface
    pub fn on_page_unavailable(&mut self, page: PageNumber) {
        if !self.resident.remove(&page) {
            return;
        }
        let indexes = self.by_page.get(&page).cloned().unwrap_or_default();
        for index in indexes {
            if let Some(element) = self.mounted.remove(&index) {
                self.elements.remove(&element);
                self.host.unmount(element);
            }
        }
    }

    /// Reposition every mounted element for the current zoom
    pub fn on_zoom_changed(&mut self) {
        self.sync();
    }

    /// Recompute and apply the geometry of every mounted element
    pub fn sync(&self) {
        let scale = self.viewport.scale();
        for (index, element) in &self.mounted {
            if let Some(field) = self.fields.get(*index) {
                self.host.place(*element, field.page, overlay_rect(field.rect, scale));
            }
        }
    }

    /// React to page lifecycle changes reported by the scroller
    pub fn handle_event(&mut self, event: &ScrollerEvent) {
        match event {
            ScrollerEvent::PageResident { page, .. } => self.on_page_resident(*page),
            ScrollerEvent::PageRendering { page, .. }
            | ScrollerEvent::PageEvicted { page }
            | ScrollerEvent::PageFailed { page, .. }
            | ScrollerEvent::NodeReleased { page, .. } => self.on_page_unavailable(*page),
            ScrollerEvent::NodeAssigned { .. } | ScrollerEvent::WindowChanged(_) => {}
        }
    }

    /// Forward a value typed into `element` to the form-data store
    ///
    /// Returns `false` if the element is not managed here.
    pub fn on_element_input(&self, element: ElementId, value: FieldValue) -> bool {
        let Some(field) = self.elements.get(&element).and_then(|index| self.fields.get(*index)) else {
            return false;
        };
        trace!("field {} changed on {element}", field.name);
        self.store.on_field_change(&field.name, value);
        true
    }

    pub fn field_for(&self, element: ElementId) -> Option<&FormField> {
        self.elements.get(&element).and_then(|index| self.fields.get(*index))
    }

    /// Element currently showing the field `id`
    pub fn element_for(&self, id: &FieldId) -> Option<ElementId> {
        let index = self.fields.iter().position(|field| &field.id == id)?;
        self.mounted.get(&index).copied()
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.len()
    }

    pub fn visible_field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden
    }

    /// Unmount everything and forget the field set (document close)
    pub fn clear(&mut self) {
        self.unmount_all();
        self.fields.clear();
        self.by_page.clear();
        self.resident.clear();
        self.hidden = 0;
    }

    fn mount_page(&mut self, page: PageNumber) {
        let Some(indexes) = self.by_page.get(&page).cloned() else {
            return;
        };
        let scale = self.viewport.scale();

        for index in indexes {
            if self.mounted.contains_key(&index) {
                continue;
            }
            let Some(field) = self.fields.get(index) else {
                continue;
            };
            self.next_element += 1;
            let element = ElementId(self.next_element);
            let value = self.store.get_field_value(&field.name).unwrap_or_else(|| field.value.clone());

            self.host.mount(element, field, &value);
            self.host.place(element, page, overlay_rect(field.rect, scale));
            self.elements.insert(element, index);
            self.mounted.insert(index, element);
        }
    }

    fn unmount_all(&mut self) {
        for (_, element) in self.mounted.drain() {
            self.host.unmount(element);
        }
        self.elements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::{AssignedRolePolicy, FieldAppearance, FieldRect, FieldType, MemoryFormStore, ShowAllFields};
    use docview_cache::ScaleTier;
    use viewer_core::{ScrollOffset, ViewportState, ViewportStore};

    fn field(id: &str, name: &str, page: PageNumber, rect: [f32; 4]) -> FormField {
        FormField {
            id: FieldId::new(id),
            name: name.to_owned(),
            page,
            rect: FieldRect::from(rect),
            field_type: FieldType::Text,
            value: FieldValue::Empty,
            appearance: FieldAppearance::default(),
        }
    }

    struct Fixture {
        host: Rc<RecordingOverlayHost>,
        store: Rc<MemoryFormStore>,
        viewport: SharedViewport,
        sync: FormOverlaySynchronizer,
    }

    fn fixture(store: MemoryFormStore, policy: Rc<dyn FieldVisibilityPolicy>, role: &str) -> Fixture {
        let host = Rc::new(RecordingOverlayHost::new());
        let store = Rc::new(store);
        let viewport = ViewportStore::shared(ViewportState::default());
        let sync = FormOverlaySynchronizer::new(
            host.clone(),
            store.clone(),
            policy,
            ContextRole::new(role),
            viewport.clone(),
        );
        Fixture { host, store, viewport, sync }
    }

    fn sample_fields() -> Vec<FormField> {
        vec![
            field("w1", "name", 1, [100.0, 200.0, 300.0, 230.0]),
            field("w2", "signature", 1, [100.0, 500.0, 250.0, 540.0]),
            field("w3", "date", 2, [50.0, 60.0, 150.0, 80.0]),
        ]
    }

    #[test]
    fn fields_mount_only_on_resident_pages() {
        let mut f = fixture(MemoryFormStore::new(), Rc::new(ShowAllFields), "signer");
        f.sync.set_fields(sample_fields());
        assert_eq!(f.sync.mounted_count(), 0);

        f.sync.on_page_resident(1);
        assert_eq!(f.sync.mounted_count(), 2);
        assert_eq!(f.host.mounted_count(), 2);

        f.sync.on_page_unavailable(1);
        assert_eq!(f.sync.mounted_count(), 0);
        assert_eq!(f.host.mounted_count(), 0);
    }

    #[test]
    fn geometry_follows_zoom() {
        let mut f = fixture(MemoryFormStore::new(), Rc::new(ShowAllFields), "signer");
        f.sync.set_fields(sample_fields());
        f.sync.on_page_resident(2);

        let mounted = f.host.element_for_field(&FieldId::new("w3")).unwrap();
        assert_eq!(mounted.rect, Some(OverlayRect { left: 50.0, top: 60.0, width: 100.0, height: 20.0 }));

        f.viewport.set_zoom(150.0, ScrollOffset::default());
        f.sync.on_zoom_changed();
        let mounted = f.host.element_for_field(&FieldId::new("w3")).unwrap();
        assert_eq!(mounted.rect, Some(OverlayRect { left: 75.0, top: 90.0, width: 150.0, height: 30.0 }));
        assert_eq!(mounted.page, 2);
    }

    #[test]
    fn hidden_fields_are_never_mounted() {
        let policy = AssignedRolePolicy::new().assign("signature", ContextRole::new("witness"));
        let mut f = fixture(MemoryFormStore::new(), Rc::new(policy), "signer");
        f.sync.set_fields(sample_fields());
        f.sync.on_page_resident(1);

        assert_eq!(f.sync.hidden_count(), 1);
        assert_eq!(f.sync.visible_field_count(), 2);
        assert_eq!(f.sync.mounted_count(), 1);
        assert!(f.host.element_for_field(&FieldId::new("w2")).is_none());
    }

    #[test]
    fn input_is_forwarded_verbatim() {
        let mut f = fixture(MemoryFormStore::new(), Rc::new(ShowAllFields), "signer");
        f.sync.set_fields(sample_fields());
        f.sync.on_page_resident(1);

        let element = f.sync.element_for(&FieldId::new("w1")).unwrap();
        assert!(f.sync.on_element_input(element, FieldValue::Text("Ada".into())));
        assert_eq!(f.store.changes(), vec![("name".to_owned(), FieldValue::Text("Ada".into()))]);

        f.sync.on_page_unavailable(1);
        assert!(!f.sync.on_element_input(element, FieldValue::Empty));
        assert_eq!(f.store.changes().len(), 1);
    }

    #[test]
    fn mount_reads_value_from_store() {
        let store = MemoryFormStore::new().with_value("date", FieldValue::Text("2024-05-01".into()));
        let mut f = fixture(store, Rc::new(ShowAllFields), "signer");
        f.sync.set_fields(sample_fields());
        f.sync.on_page_resident(2);

        let mounted = f.host.element_for_field(&FieldId::new("w3")).unwrap();
        assert_eq!(mounted.value, FieldValue::Text("2024-05-01".into()));
    }

    #[test]
    fn field_set_change_rebuilds_mapping() {
        let mut f = fixture(MemoryFormStore::new(), Rc::new(ShowAllFields), "signer");
        f.sync.set_fields(sample_fields());
        f.sync.on_page_resident(1);
        let before = f.sync.element_for(&FieldId::new("w1")).unwrap();

        f.sync.set_fields(vec![field("w1", "name", 1, [0.0, 0.0, 10.0, 10.0])]);
        let after = f.sync.element_for(&FieldId::new("w1")).unwrap();

        assert_ne!(before, after);
        assert!(f.sync.field_for(before).is_none());
        assert_eq!(f.host.mounted_count(), 1);
        assert_eq!(f.host.mount_count(), 3);
    }

    #[test]
    fn scroller_events_drive_residency() {
        let mut f = fixture(MemoryFormStore::new(), Rc::new(ShowAllFields), "signer");
        f.sync.set_fields(sample_fields());
        let tier = ScaleTier::nearest(1.0);

        f.sync.handle_event(&ScrollerEvent::PageResident { page: 1, tier });
        assert_eq!(f.sync.mounted_count(), 2);
        f.sync.handle_event(&ScrollerEvent::PageRendering { page: 1, tier });
        assert_eq!(f.sync.mounted_count(), 0);
        f.sync.handle_event(&ScrollerEvent::PageResident { page: 2, tier });
        f.sync.handle_event(&ScrollerEvent::PageEvicted { page: 2 });
        assert_eq!(f.sync.mounted_count(), 0);
    }

    #[test]
    fn clear_unmounts_everything() {
        let mut f = fixture(MemoryFormStore::new(), Rc::new(ShowAllFields), "signer");
        f.sync.set_fields(sample_fields());
        f.sync.on_page_resident(1);
        f.sync.on_page_resident(2);

        f.sync.clear();
        assert_eq!(f.host.mounted_count(), 0);
        assert_eq!(f.sync.visible_field_count(), 0);
        f.sync.on_page_resident(1);
        assert_eq!(f.sync.mounted_count(), 0);
    }
}
