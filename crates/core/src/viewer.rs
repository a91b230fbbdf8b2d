//! Viewer session
//!
//! [`Viewer`] opens a document through a [`DocumentEngine`] and wires the
//! viewport store, zoom controller, render cache, scroller and overlay
//! synchronizer together. Viewport changes schedule a debounced scroller
//! pass; scroller events mount and unmount form overlays.
//!
//! # Example
//!
//! ```
//! use doc_model::synthetic::SyntheticEngine;
//! use doc_model::PageSize;
//! use docview_core::{PageState, Viewer, ViewerContext, ViewerOptions};
//! use futures::executor::LocalPool;
//! use std::rc::Rc;
//!
//! let mut pool = LocalPool::new();
//! let engine = Rc::new(SyntheticEngine::uniform(20, PageSize::new(612.0, 792.0)));
//! let context = ViewerContext::new(Rc::new(pool.spawner()));
//!
//! let viewer = Viewer::open(engine, ViewerOptions::default(), context).unwrap();
//! pool.run_until_stalled();
//!
//! assert_eq!(viewer.page_state(1), Some(PageState::Resident));
//! ```

use doc_model::{
    form_fields, ContextRole, Document, DocumentEngine, FieldId, FieldValue, FieldVisibilityPolicy,
    FormDataStore, MemoryFormStore, PageNumber, ShowAllFields,
};
use docview_cache::{CacheBudget, CacheStats, RenderCache, SurfaceFuture};
use docview_scheduler::{Clock, SystemClock};
use futures::task::LocalSpawn;
use log::info;
use std::cell::RefCell;
use std::rc::Rc;
use viewer_core::{
    DocumentLayout, PinchTracker, ScrollOffset, SharedViewport, SubscriptionId, TouchPoint, ViewportChange,
    ViewportState, ViewportStore, ZoomController, ZoomMode, DEFAULT_ZOOM_PERCENT,
};

use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::overlay::{ElementId, FormOverlaySynchronizer, OverlayHost, RecordingOverlayHost};
use crate::scroller::{PageState, ScrollWindows, VirtualScroller};

/// Collaborators a session runs against
pub struct ViewerContext {
    spawner: Rc<dyn LocalSpawn>,
    clock: Rc<dyn Clock>,
    form_store: Rc<dyn FormDataStore>,
    visibility: Rc<dyn FieldVisibilityPolicy>,
    overlay_host: Rc<dyn OverlayHost>,
    role: ContextRole,
}

impl ViewerContext {
    /// Create a context with the system clock, an in-memory form store,
    /// every field visible and a recording overlay host
    pub fn new(spawner: Rc<dyn LocalSpawn>) -> Self {
        Self {
            spawner,
            clock: Rc::new(SystemClock),
            form_store: Rc::new(MemoryFormStore::new()),
            visibility: Rc::new(ShowAllFields),
            overlay_host: Rc::new(RecordingOverlayHost::new()),
            role: ContextRole::new("viewer"),
        }
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_form_store(mut self, store: Rc<dyn FormDataStore>) -> Self {
        self.form_store = store;
        self
    }

    pub fn with_visibility(mut self, policy: Rc<dyn FieldVisibilityPolicy>) -> Self {
        self.visibility = policy;
        self
    }

    pub fn with_overlay_host(mut self, host: Rc<dyn OverlayHost>) -> Self {
        self.overlay_host = host;
        self
    }

    pub fn with_role(mut self, role: ContextRole) -> Self {
        self.role = role;
        self
    }
}

/// Settings a session is opened with
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerOptions {
    pub config: ViewerConfig,
    pub budget: CacheBudget,
    pub container_width: f64,
    pub container_height: f64,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        let viewport = ViewportState::default();
        Self {
            config: ViewerConfig::default(),
            budget: CacheBudget::default(),
            container_width: viewport.container_width,
            container_height: viewport.container_height,
        }
    }
}

/// An open document in a viewport
pub struct Viewer {
    document: Document,
    layout: Rc<DocumentLayout>,
    viewport: SharedViewport,
    zoom: ZoomController,
    pinch: PinchTracker,
    cache: Rc<RenderCache>,
    scroller: Rc<VirtualScroller>,
    overlay: Rc<RefCell<FormOverlaySynchronizer>>,
    subscription: Option<SubscriptionId>,
}

impl Viewer {
    pub fn open(
        engine: Rc<dyn DocumentEngine>,
        options: ViewerOptions,
        context: ViewerContext,
    ) -> Result<Self, ViewerError> {
        let page_count = engine.page_count();
        if page_count == 0 {
            return Err(ViewerError::EmptyDocument);
        }

        let pages = (1..=page_count)
            .map(|page| engine.get_page(page).map(|handle| handle.size))
            .collect::<Result<Vec<_>, _>>()?;
        let document = Document::new(pages);
        let fields = form_fields(&engine.field_objects()?);

        let config = &options.config;
        let layout = Rc::new(DocumentLayout::new(&document, config.page_gap));
        let viewport = ViewportStore::shared(ViewportState {
            zoom_percent: DEFAULT_ZOOM_PERCENT,
            scroll: ScrollOffset::default(),
            container_width: options.container_width,
            container_height: options.container_height,
        });
        let zoom = ZoomController::new(viewport.clone(), config.fit_padding);
        let cache = Rc::new(RenderCache::with_max_thumbnails(engine, options.budget, config.max_thumbnails));
        let scroller = Rc::new(VirtualScroller::new(
            Rc::clone(&layout),
            viewport.clone(),
            Rc::clone(&cache),
            context.spawner,
            context.clock,
            config.scroller_config(&options.budget),
        ));

        let overlay = Rc::new(RefCell::new(FormOverlaySynchronizer::new(
            context.overlay_host,
            context.form_store,
            context.visibility,
            context.role,
            viewport.clone(),
        )));
        overlay.borrow_mut().set_fields(fields);

        let weak_overlay = Rc::downgrade(&overlay);
        scroller.subscribe(move |event| {
            if let Some(overlay) = weak_overlay.upgrade() {
                overlay.borrow_mut().handle_event(event);
            }
        });

        let weak_scroller = Rc::downgrade(&scroller);
        let weak_overlay = Rc::downgrade(&overlay);
        let subscription = viewport.subscribe(move |_, change| {
            if let Some(scroller) = weak_scroller.upgrade() {
                scroller.request_update();
            }
            if matches!(change, ViewportChange::Zoom { .. }) {
                if let Some(overlay) = weak_overlay.upgrade() {
                    overlay.borrow_mut().on_zoom_changed();
                }
            }
        });

        scroller.update_now();
        info!(
            "opened document: {page_count} pages, {} form fields, byte limit {}",
            overlay.borrow().visible_field_count(),
            cache.byte_limit()
        );

        Ok(Self {
            document,
            layout,
            viewport,
            zoom,
            pinch: PinchTracker::new(),
            cache,
            scroller,
            overlay,
            subscription: Some(subscription),
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    pub fn viewport(&self) -> &SharedViewport {
        &self.viewport
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn scroller(&self) -> &VirtualScroller {
        &self.scroller
    }

    pub fn zoom_percent(&self) -> f64 {
        self.viewport.zoom_percent()
    }

    pub fn zoom_mode(&self) -> ZoomMode {
        self.zoom.mode()
    }

    pub fn current_page(&self) -> Option<PageNumber> {
        self.scroller.current_page()
    }

    pub fn page_state(&self, page: PageNumber) -> Option<PageState> {
        self.scroller.page_state(page)
    }

    pub fn windows(&self) -> Option<ScrollWindows> {
        self.scroller.windows()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_none()
    }

    /// Scroll by a delta in viewport pixels, clamped to the document
    pub fn scroll_by(&self, dx: f64, dy: f64) -> bool {
        let scroll = self.viewport.scroll();
        self.scroll_to(ScrollOffset::new(scroll.x + dx, scroll.y + dy))
    }

    /// Scroll to an offset in viewport pixels, clamped to the document
    pub fn scroll_to(&self, offset: ScrollOffset) -> bool {
        let state = self.viewport.snapshot();
        let max = self.layout.max_scroll(state.scale(), state.container_width, state.container_height);
        self.viewport.set_scroll(ScrollOffset::new(offset.x.min(max.x), offset.y.min(max.y)))
    }

    /// Jump to the top of `page`, or as close as the document end allows
    pub fn go_to_page(&self, page: PageNumber) -> bool {
        self.scroller.scroll_to_page(page)
    }

    /// Record a new container size; sticky fit modes are re-applied
    pub fn resize(&mut self, width: f64, height: f64) -> bool {
        self.zoom.on_container_resize(width, height)
    }

    pub fn zoom_in(&mut self) -> bool {
        self.zoom.step_in()
    }

    pub fn zoom_out(&mut self) -> bool {
        self.zoom.step_out()
    }

    pub fn set_zoom(&mut self, percent: f64) -> bool {
        self.zoom.set_zoom(percent)
    }

    /// Fit the widest page to the container width
    pub fn fit_width(&mut self) -> bool {
        let state = self.viewport.snapshot();
        self.zoom.fit_to_width(state.container_width, self.layout.max_page_width())
    }

    /// Fit the current page inside the container
    pub fn fit_page(&mut self) -> bool {
        let state = self.viewport.snapshot();
        let size = self
            .current_page()
            .and_then(|page| self.layout.page_size(page))
            .or_else(|| self.document.page(1))
            .unwrap_or_default();
        self.zoom.fit_to_page(
            state.container_width,
            state.container_height,
            size.width as f64,
            size.height as f64,
        )
    }

    pub fn touch_start(&mut self, touches: &[TouchPoint]) {
        self.pinch.on_touch_start(touches, &self.zoom);
    }

    /// Returns whether the pinch changed the zoom
    pub fn touch_move(&mut self, touches: &[TouchPoint]) -> bool {
        self.pinch.on_touch_move(touches, &mut self.zoom)
    }

    pub fn touch_end(&mut self, remaining: &[TouchPoint]) {
        self.pinch.on_touch_end(remaining);
    }

    /// Run the scroller if its debounced update is due; call from the host event loop
    pub fn tick(&self) -> bool {
        self.scroller.tick()
    }

    /// Re-evaluate pages immediately, skipping the rendering delay
    pub fn render_now(&self) {
        self.scroller.update_now();
    }

    /// Forward a value typed into an overlay element to the form-data store
    pub fn field_input(&self, element: ElementId, value: FieldValue) -> bool {
        self.overlay.borrow().on_element_input(element, value)
    }

    /// Overlay element currently showing the field `id`
    pub fn element_for_field(&self, id: &FieldId) -> Option<ElementId> {
        self.overlay.borrow().element_for(id)
    }

    pub fn mounted_fields(&self) -> usize {
        self.overlay.borrow().mounted_count()
    }

    pub fn thumbnail(&self, page: PageNumber, max_width: u32) -> SurfaceFuture {
        self.cache.generate_thumbnail(page, max_width)
    }

    /// Release every surface, request, node and overlay element
    pub fn close(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        self.viewport.unsubscribe(subscription);
        self.scroller.close();
        self.overlay.borrow_mut().clear();
        self.cache.clear();
        info!("closed document ({} pages)", self.document.page_count());
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_model::synthetic::SyntheticEngine;
    use doc_model::{FieldDescriptor, FieldRect, FieldType, FieldWidget, PageSize};
    use docview_scheduler::ManualClock;
    use futures::executor::{block_on, LocalPool};
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Session {
        pool: LocalPool,
        clock: ManualClock,
        host: Rc<RecordingOverlayHost>,
        store: Rc<MemoryFormStore>,
        viewer: Viewer,
    }

    impl Session {
        fn open(engine: SyntheticEngine) -> Self {
            let pool = LocalPool::new();
            let clock = ManualClock::new();
            let host = Rc::new(RecordingOverlayHost::new());
            let store = Rc::new(MemoryFormStore::new());
            let context = ViewerContext::new(Rc::new(pool.spawner()))
                .with_clock(Rc::new(clock.clone()))
                .with_overlay_host(host.clone())
                .with_form_store(store.clone());
            let options = ViewerOptions { container_width: 800.0, container_height: 700.0, ..ViewerOptions::default() };

            let viewer = Viewer::open(Rc::new(engine), options, context).unwrap();
            Self { pool, clock, host, store, viewer }
        }

        fn settle(&mut self) {
            self.pool.run_until_stalled();
        }

        fn wait_for_update(&mut self) -> bool {
            self.clock.advance(Duration::from_millis(100));
            let ran = self.viewer.tick();
            self.settle();
            ran
        }

        fn pages(&self, state: PageState) -> Vec<PageNumber> {
            self.viewer.scroller().pages_in(state)
        }
    }

    fn letter(pages: u32) -> SyntheticEngine {
        SyntheticEngine::uniform(pages, PageSize::new(612.0, 792.0))
    }

    fn with_name_field(engine: SyntheticEngine) -> SyntheticEngine {
        with_name_field_on(engine, 1)
    }

    fn with_name_field_on(engine: SyntheticEngine, page: PageNumber) -> SyntheticEngine {
        let mut fields = BTreeMap::new();
        fields.insert(
            "name".to_owned(),
            FieldDescriptor {
                field_type: FieldType::Text,
                value: FieldValue::Empty,
                widgets: vec![FieldWidget::new("w1", page, FieldRect::new(100.0, 200.0, 300.0, 230.0))],
            },
        );
        engine.with_fields(fields)
    }

    #[test]
    fn page_jump_in_a_fifty_page_document() {
        let mut s = Session::open(letter(50));
        s.settle();
        assert_eq!(s.pages(PageState::Resident), vec![1, 2, 3, 4]);

        assert!(s.viewer.go_to_page(10));
        assert!(!s.viewer.tick());
        s.clock.advance(Duration::from_millis(100));
        assert!(s.viewer.tick());
        assert_eq!(s.pages(PageState::Rendering), (7..=13).collect::<Vec<_>>());

        s.settle();
        assert_eq!(s.viewer.current_page(), Some(10));
        assert_eq!(s.pages(PageState::Resident), (7..=13).collect::<Vec<_>>());
        assert_eq!(s.pages(PageState::Evicted), vec![1, 2, 3, 4]);
        for page in (5..=6).chain(14..=50) {
            assert_eq!(s.viewer.page_state(page), Some(PageState::Unseen), "page {page}");
        }
    }

    #[test]
    fn jump_to_last_page_is_clamped_to_the_document() {
        let mut s = Session::open(letter(5));
        s.viewer.set_zoom(50.0);
        s.settle();

        assert!(s.viewer.go_to_page(5));
        let total = (5.0 * 792.0 + 4.0 * 16.0) * 0.5;
        assert_eq!(s.viewer.viewport().scroll().y, total - 700.0);

        assert!(s.wait_for_update());
        assert_eq!(s.viewer.current_page(), Some(5));
        assert_eq!(s.viewer.page_state(5), Some(PageState::Resident));
    }

    #[test]
    fn overlay_is_unmounted_when_the_cache_reclaims_its_page() {
        let pool = LocalPool::new();
        let clock = ManualClock::new();
        let host = Rc::new(RecordingOverlayHost::new());
        let context = ViewerContext::new(Rc::new(pool.spawner()))
            .with_clock(Rc::new(clock.clone()))
            .with_overlay_host(host.clone());
        let budget = CacheBudget {
            max_resident_pages: 5,
            max_canvas_pixels: 16_777_216,
            prefetch_pages: 1,
            average_page_bytes: 612 * 792 * 4,
        };
        let options = ViewerOptions {
            config: ViewerConfig { retention_margin: 4, ..ViewerConfig::default() },
            budget,
            container_width: 800.0,
            container_height: 700.0,
        };
        let viewer = Viewer::open(Rc::new(with_name_field_on(letter(30), 2)), options, context).unwrap();
        let mut s = Session { pool, clock, host, store: Rc::new(MemoryFormStore::new()), viewer };
        s.settle();
        assert_eq!(s.viewer.mounted_fields(), 1);

        for page in [4, 7] {
            assert!(s.viewer.go_to_page(page));
            assert!(s.wait_for_update());
        }

        assert_eq!(s.viewer.page_state(2), Some(PageState::Evicted));
        assert!(s.viewer.cache().peek(2).is_none());
        assert_eq!(s.viewer.mounted_fields(), 0);
        assert_eq!(s.host.mounted_count(), 0);
    }

    #[test]
    fn empty_document_is_rejected() {
        let pool = LocalPool::new();
        let result = Viewer::open(
            Rc::new(letter(0)),
            ViewerOptions::default(),
            ViewerContext::new(Rc::new(pool.spawner())),
        );
        assert!(matches!(result, Err(ViewerError::EmptyDocument)));
    }

    #[test]
    fn overlays_follow_residency_and_zoom() {
        let mut s = Session::open(with_name_field(letter(5)));
        assert_eq!(s.viewer.mounted_fields(), 0);
        s.settle();
        assert_eq!(s.viewer.mounted_fields(), 1);

        let id = FieldId::new("w1");
        let element = s.viewer.element_for_field(&id).unwrap();
        assert_eq!(s.host.element(element).unwrap().rect.map(|rect| rect.width), Some(200.0));

        assert!(s.viewer.zoom_in());
        assert_eq!(s.viewer.zoom_percent(), 125.0);
        assert_eq!(s.host.element(element).unwrap().rect.map(|rect| rect.width), Some(250.0));

        assert!(s.wait_for_update());
        assert_eq!(s.viewer.page_state(1), Some(PageState::Resident));
        assert_eq!(s.viewer.mounted_fields(), 1);
    }

    #[test]
    fn field_input_reaches_the_store() {
        let mut s = Session::open(with_name_field(letter(3)));
        s.settle();

        let element = s.viewer.element_for_field(&FieldId::new("w1")).unwrap();
        assert!(s.viewer.field_input(element, FieldValue::Text("Ada Lovelace".into())));
        assert_eq!(s.store.changes(), vec![("name".to_owned(), FieldValue::Text("Ada Lovelace".into()))]);
    }

    #[test]
    fn scroll_is_clamped_to_the_document() {
        let s = Session::open(letter(2));
        s.viewer.scroll_by(0.0, 1e9);

        let expected = s.viewer.layout().total_height() - 700.0;
        assert_eq!(s.viewer.viewport().scroll().y, expected);
        assert_eq!(s.viewer.viewport().scroll().x, 0.0);
    }

    #[test]
    fn fit_width_is_sticky_across_resize() {
        let mut s = Session::open(letter(3));
        assert!(s.viewer.fit_width());
        assert!((s.viewer.zoom_percent() - 760.0 / 612.0 * 100.0).abs() < 1e-9);

        s.viewer.resize(1000.0, 700.0);
        assert!((s.viewer.zoom_percent() - 960.0 / 612.0 * 100.0).abs() < 1e-9);
        assert!(matches!(s.viewer.zoom_mode(), ZoomMode::FitWidth { .. }));

        s.viewer.set_zoom(100.0);
        assert_eq!(s.viewer.zoom_mode(), ZoomMode::Percent);
    }

    #[test]
    fn pinch_rerenders_at_the_new_tier() {
        let mut s = Session::open(letter(6));
        s.settle();

        s.viewer.touch_start(&[TouchPoint::new(1, 300.0, 300.0), TouchPoint::new(2, 400.0, 300.0)]);
        assert!(s.viewer.touch_move(&[TouchPoint::new(1, 250.0, 300.0), TouchPoint::new(2, 450.0, 300.0)]));
        s.viewer.touch_end(&[]);
        assert!((s.viewer.zoom_percent() - 200.0).abs() < 1e-9);

        assert!(s.wait_for_update());
        let tier = s.viewer.scroller().active_tier().unwrap();
        assert_eq!(tier.scale(), 2.0);
        assert_eq!(s.viewer.cache().resident_tier(1), Some(tier));
    }

    #[test]
    fn thumbnails_are_independent_of_the_page_cache() {
        let s = Session::open(letter(4));
        let thumbnail = block_on(s.viewer.thumbnail(3, 100)).unwrap();
        assert!(thumbnail.width <= 100);
        assert!(s.viewer.cache().peek(3).is_none());
    }

    #[test]
    fn close_releases_everything() {
        let mut s = Session::open(with_name_field(letter(8)));
        s.settle();
        assert!(s.host.mounted_count() > 0);

        s.viewer.close();
        assert!(s.viewer.is_closed());
        assert_eq!(s.host.mounted_count(), 0);
        assert!(s.viewer.cache().resident_pages().is_empty());
        assert!(s.viewer.scroller().assigned_pages().is_empty());
        assert_eq!(s.viewer.viewport().listener_count(), 0);

        assert!(!s.viewer.tick());
        s.viewer.close();
    }
}
