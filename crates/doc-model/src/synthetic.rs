//! In-process reference engine producing solid-fill RGBA surfaces.
//!
//! Rendering can complete immediately or be deferred until the caller
//! releases it, and failures can be injected per page. Used by tests and
//! by the CLI's scripted sessions.

use futures::channel::oneshot;
use futures::future::{self, FutureExt};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::{
    surface_dimensions, DocumentEngine, EngineError, FieldDescriptor, PageHandle, PageNumber,
    PageSize, RenderFuture, Surface,
};

struct PendingRender {
    handle: PageHandle,
    scale: f32,
    sender: oneshot::Sender<Result<Surface, EngineError>>,
}

#[derive(Default)]
pub struct SyntheticEngine {
    pages: Vec<PageSize>,
    fields: BTreeMap<String, FieldDescriptor>,
    deferred: bool,
    render_calls: Cell<usize>,
    requests: RefCell<Vec<(PageNumber, f32)>>,
    failures: RefCell<HashMap<PageNumber, Option<u32>>>,
    pending: RefCell<VecDeque<PendingRender>>,
}

impl SyntheticEngine {
    pub fn new(pages: Vec<PageSize>) -> Self {
        Self { pages, ..Self::default() }
    }

    pub fn uniform(page_count: u32, size: PageSize) -> Self {
        Self::new(vec![size; page_count as usize])
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, FieldDescriptor>) -> Self {
        self.fields = fields;
        self
    }

    /// Holds every render until [`complete_next`](Self::complete_next) or
    /// [`complete_all`](Self::complete_all) releases it.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Fails the next `times` rasterizations of `page`.
    pub fn fail_page(&self, page: PageNumber, times: u32) {
        self.failures.borrow_mut().insert(page, Some(times));
    }

    pub fn fail_page_always(&self, page: PageNumber) {
        self.failures.borrow_mut().insert(page, None);
    }

    pub fn render_calls(&self) -> usize {
        self.render_calls.get()
    }

    pub fn render_requests(&self) -> Vec<(PageNumber, f32)> {
        self.requests.borrow().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Releases the oldest deferred render. Returns `false` when nothing is pending.
    pub fn complete_next(&self) -> bool {
        let Some(pending) = self.pending.borrow_mut().pop_front() else {
            return false;
        };
        let result = self.rasterize(&pending.handle, pending.scale);
        // The receiver may have been dropped along with a discarded request.
        let _ = pending.sender.send(result);
        true
    }

    /// Releases the oldest deferred render of `page`.
    pub fn complete_page(&self, page: PageNumber) -> bool {
        let pending = {
            let mut queue = self.pending.borrow_mut();
            let Some(index) = queue.iter().position(|pending| pending.handle.page == page) else {
                return false;
            };
            queue.remove(index)
        };
        let Some(pending) = pending else {
            return false;
        };
        let result = self.rasterize(&pending.handle, pending.scale);
        let _ = pending.sender.send(result);
        true
    }

    pub fn complete_all(&self) -> usize {
        let mut completed = 0;
        while self.complete_next() {
            completed += 1;
        }
        completed
    }

    fn take_failure(&self, page: PageNumber) -> bool {
        let mut failures = self.failures.borrow_mut();
        match failures.get_mut(&page) {
            Some(None) => true,
            Some(Some(0)) => {
                failures.remove(&page);
                false
            }
            Some(Some(remaining)) => {
                *remaining -= 1;
                true
            }
            None => false,
        }
    }

    fn rasterize(&self, handle: &PageHandle, scale: f32) -> Result<Surface, EngineError> {
        if self.take_failure(handle.page) {
            return Err(EngineError::Decode {
                page: handle.page,
                reason: "injected failure".to_owned(),
            });
        }

        let (width, height) = surface_dimensions(handle.size, scale);
        let fill = (handle.page % 251) as u8;
        let pixels = vec![fill; width as usize * height as usize * 4];
        Ok(Surface::new(handle.page, width, height, scale, pixels))
    }
}

impl DocumentEngine for SyntheticEngine {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn get_page(&self, page: PageNumber) -> Result<PageHandle, EngineError> {
        page.checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .map(|size| PageHandle { page, size: *size })
            .ok_or(EngineError::PageOutOfRange { page, page_count: self.page_count() })
    }

    fn render_page(&self, handle: &PageHandle, scale: f32) -> RenderFuture {
        self.render_calls.set(self.render_calls.get() + 1);
        self.requests.borrow_mut().push((handle.page, scale));

        if !self.deferred {
            return future::ready(self.rasterize(handle, scale)).boxed_local();
        }

        let (sender, receiver) = oneshot::channel();
        self.pending.borrow_mut().push_back(PendingRender { handle: *handle, scale, sender });
        let page = handle.page;
        receiver.map(move |result| result.unwrap_or(Err(EngineError::Cancelled { page }))).boxed_local()
    }

    fn field_objects(&self) -> Result<BTreeMap<String, FieldDescriptor>, EngineError> {
        Ok(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn immediate_engine_renders_floor_sized_surfaces() {
        let engine = SyntheticEngine::uniform(3, PageSize::new(100.0, 50.0));
        let handle = engine.get_page(2).unwrap();

        let surface = block_on(engine.render_page(&handle, 1.5)).unwrap();
        assert_eq!((surface.width, surface.height), (150, 75));
        assert_eq!(surface.size_bytes(), 150 * 75 * 4);
        assert_eq!(engine.render_calls(), 1);
        assert_eq!(engine.render_requests(), vec![(2, 1.5)]);
    }

    #[test]
    fn get_page_rejects_out_of_range() {
        let engine = SyntheticEngine::uniform(3, PageSize::default());
        assert_eq!(engine.get_page(0), Err(EngineError::PageOutOfRange { page: 0, page_count: 3 }));
        assert!(engine.get_page(4).is_err());
    }

    #[test]
    fn deferred_engine_waits_for_completion() {
        let engine = SyntheticEngine::uniform(2, PageSize::new(10.0, 10.0)).deferred();
        let handle = engine.get_page(1).unwrap();
        let mut render = engine.render_page(&handle, 1.0);

        assert!((&mut render).now_or_never().is_none());
        assert_eq!(engine.pending_count(), 1);
        assert!(engine.complete_page(1));
        assert!(block_on(render).is_ok());
        assert!(!engine.complete_next());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let engine = SyntheticEngine::uniform(1, PageSize::new(10.0, 10.0));
        let handle = engine.get_page(1).unwrap();
        engine.fail_page(1, 2);

        assert!(block_on(engine.render_page(&handle, 1.0)).is_err());
        assert!(block_on(engine.render_page(&handle, 1.0)).is_err());
        assert!(block_on(engine.render_page(&handle, 1.0)).is_ok());
    }

    #[test]
    fn dropped_sender_reports_cancellation() {
        let engine = SyntheticEngine::uniform(1, PageSize::new(10.0, 10.0)).deferred();
        let handle = engine.get_page(1).unwrap();
        let render = engine.render_page(&handle, 1.0);

        engine.pending.borrow_mut().clear();
        assert_eq!(block_on(render), Err(EngineError::Cancelled { page: 1 }));
    }
}
