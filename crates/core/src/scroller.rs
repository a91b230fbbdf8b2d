//! Virtual scrolling over a continuous page layout
//!
//! The scroller decides which pages are worth rendering from the viewport's
//! scroll position and size. Each pass computes three nested windows around
//! the visible range:
//!
//! - **prefetch**: visible ± `prefetch_pages`, rendered at the active tier and
//!   pinned in the render cache
//! - **retention**: visible ± (`prefetch_pages + retention_margin`), where
//!   page nodes are kept so small scroll-backs do not flicker
//! - everything else, whose nodes are released and whose requests are cancelled
//!
//! Passes are debounced: scroll and zoom changes call
//! [`request_update`](VirtualScroller::request_update) and the host calls
//! [`tick`](VirtualScroller::tick) from its event loop. Render completions are
//! awaited on tasks spawned on the host's [`LocalSpawn`] executor.
//!
//! # Page states
//!
//! ```text
//! Unseen/Evicted --enter prefetch--> Prefetched --ensure--> Rendering --ok--> Resident
//!                                        ^                      |
//!                                        +------ retry ---------+--give up--> Failed
//! Resident --leave retention / reclaimed by the cache--> Evicted
//! ```
//!
//! The cache may evict unpinned surfaces while storing a completed render; those
//! pages are moved to `Evicted` as part of handling that completion.

use doc_model::{PageNumber, PageRange, Surface};
use docview_cache::{RenderCache, RenderError, ScaleTier, SurfaceFuture};
use docview_scheduler::{Clock, Debouncer, RetryDecision, RetryTracker};
use futures::task::{LocalSpawn, LocalSpawnExt};
use log::{debug, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use viewer_core::{DocumentLayout, ScrollOffset, SharedViewport};

use crate::nodes::{NodeId, PageNodePool};

/// Lifecycle state of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageState {
    /// Never entered the prefetch window
    Unseen,
    /// In the prefetch window, waiting for a render request
    Prefetched,
    /// Render request in flight
    Rendering,
    /// Surface available at the active tier
    Resident,
    /// Dropped after leaving the prefetch or retention window
    Evicted,
    /// Gave up after repeated rasterization failures
    Failed,
}

impl PageState {
    /// Whether the page currently holds resources (a request, a surface or an error placeholder)
    pub fn is_materialized(self) -> bool {
        matches!(self, Self::Prefetched | Self::Rendering | Self::Resident | Self::Failed)
    }
}

/// Notifications emitted by the scroller
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollerEvent {
    WindowChanged(ScrollWindows),
    NodeAssigned { page: PageNumber, node: NodeId },
    NodeReleased { page: PageNumber, node: NodeId },
    PageRendering { page: PageNumber, tier: ScaleTier },
    PageResident { page: PageNumber, tier: ScaleTier },
    PageEvicted { page: PageNumber },
    PageFailed { page: PageNumber, error: RenderError },
}

/// Windows computed by the last pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScrollWindows {
    pub visible: PageRange,
    pub prefetch: PageRange,
    pub retention: PageRange,
}

/// Scroller tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollerConfig {
    /// Pages rendered on each side of the visible range
    pub prefetch_pages: u32,
    /// Extra pages beyond the prefetch window whose nodes are kept
    pub retention_margin: u32,
    /// Quiet period before a scroll or zoom change triggers a pass
    pub rendering_delay: Duration,
    /// Failures after which a page is marked [`PageState::Failed`]
    pub max_render_retries: u32,
}

impl Default for ScrollerConfig {
    fn default() -> Self {
        Self {
            prefetch_pages: 3,
            retention_margin: 2,
            rendering_delay: Duration::from_millis(100),
            max_render_retries: 3,
        }
    }
}

type Listener = Rc<dyn Fn(&ScrollerEvent)>;
type Listeners = Rc<RefCell<Vec<Listener>>>;

struct ScrollerState {
    pages: Vec<PageState>,
    nodes: PageNodePool,
    retries: RetryTracker<PageNumber>,
    /// Live request id per rendering page; completions with another id are ignored
    requests: HashMap<PageNumber, u64>,
    next_request: u64,
    windows: Option<ScrollWindows>,
    tier: Option<ScaleTier>,
    retry_pending: bool,
    closed: bool,
}

impl ScrollerState {
    fn page(&self, page: PageNumber) -> PageState {
        page.checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .copied()
            .unwrap_or(PageState::Unseen)
    }

    fn set(&mut self, page: PageNumber, state: PageState) {
        if let Some(slot) = page.checked_sub(1).and_then(|index| self.pages.get_mut(index as usize)) {
            *slot = state;
        }
    }

    fn finish(
        &mut self,
        page: PageNumber,
        tier: ScaleTier,
        request_id: u64,
        result: Result<Rc<Surface>, RenderError>,
        reclaimed: &[PageNumber],
    ) -> Vec<ScrollerEvent> {
        if self.closed {
            return Vec::new();
        }
        let mut events = Vec::new();
        if self.requests.get(&page) == Some(&request_id) {
            self.requests.remove(&page);
            events = self.settle(page, tier, result);
        }
        self.reclaim(reclaimed, &mut events);
        events
    }

    /// Resident pages whose surface the cache dropped
    fn reclaim(&mut self, pages: &[PageNumber], events: &mut Vec<ScrollerEvent>) {
        for &page in pages {
            if self.page(page) == PageState::Resident {
                debug!("surface of page {page} was reclaimed by the cache");
                self.set(page, PageState::Evicted);
                events.push(ScrollerEvent::PageEvicted { page });
            }
        }
    }

    fn settle(
        &mut self,
        page: PageNumber,
        tier: ScaleTier,
        result: Result<Rc<Surface>, RenderError>,
    ) -> Vec<ScrollerEvent> {
        match result {
            Ok(_) => {
                self.set(page, PageState::Resident);
                self.retries.record_success(page);
                vec![ScrollerEvent::PageResident { page, tier }]
            }
            Err(error) if error.is_stale() => {
                debug!("render of page {page} went stale, retrying on the next pass");
                self.set(page, PageState::Prefetched);
                self.retry_pending = true;
                Vec::new()
            }
            Err(error) => match self.retries.record_failure(page) {
                RetryDecision::Retry { attempts } => {
                    debug!("render of page {page} failed (attempt {attempts}): {error}");
                    self.set(page, PageState::Prefetched);
                    self.retry_pending = true;
                    Vec::new()
                }
                RetryDecision::GiveUp { attempts } => {
                    warn!("page {page} failed after {attempts} attempts: {error}");
                    self.set(page, PageState::Failed);
                    vec![ScrollerEvent::PageFailed { page, error }]
                }
            },
        }
    }
}

fn emit(listeners: &Listeners, events: &[ScrollerEvent]) {
    if events.is_empty() {
        return;
    }
    let listeners: Vec<Listener> = listeners.borrow().iter().cloned().collect();
    for event in events {
        for listener in &listeners {
            listener(event);
        }
    }
}

struct Completion {
    state: Weak<RefCell<ScrollerState>>,
    cache: Weak<RenderCache>,
    listeners: Listeners,
    page: PageNumber,
    tier: ScaleTier,
    request_id: u64,
}

async fn await_render(completion: Completion, render: SurfaceFuture) {
    let result = render.await;
    let Some(state) = completion.state.upgrade() else {
        return;
    };
    let reclaimed = completion.cache.upgrade().map(|cache| cache.take_reclaimed()).unwrap_or_default();
    let events =
        state.borrow_mut().finish(completion.page, completion.tier, completion.request_id, result, &reclaimed);
    emit(&completion.listeners, &events);
}

/// Drives rendering of the pages around the viewport
pub struct VirtualScroller {
    state: Rc<RefCell<ScrollerState>>,
    listeners: Listeners,
    layout: Rc<DocumentLayout>,
    viewport: SharedViewport,
    cache: Rc<RenderCache>,
    spawner: Rc<dyn LocalSpawn>,
    debouncer: RefCell<Debouncer>,
    config: ScrollerConfig,
}

impl VirtualScroller {
    pub fn new(
        layout: Rc<DocumentLayout>,
        viewport: SharedViewport,
        cache: Rc<RenderCache>,
        spawner: Rc<dyn LocalSpawn>,
        clock: Rc<dyn Clock>,
        config: ScrollerConfig,
    ) -> Self {
        let state = ScrollerState {
            pages: vec![PageState::Unseen; layout.page_count() as usize],
            nodes: PageNodePool::new(),
            retries: RetryTracker::new(config.max_render_retries),
            requests: HashMap::new(),
            next_request: 0,
            windows: None,
            tier: None,
            retry_pending: false,
            closed: false,
        };

        Self {
            state: Rc::new(RefCell::new(state)),
            listeners: Rc::new(RefCell::new(Vec::new())),
            layout,
            viewport,
            cache,
            spawner,
            debouncer: RefCell::new(Debouncer::new(config.rendering_delay, clock)),
            config,
        }
    }

    pub fn config(&self) -> ScrollerConfig {
        self.config
    }

    /// Register a listener for scroller events
    pub fn subscribe(&self, listener: impl Fn(&ScrollerEvent) + 'static) {
        self.listeners.borrow_mut().push(Rc::new(listener));
    }

    /// Schedule a pass once the rendering delay has passed without further requests
    pub fn request_update(&self) {
        self.debouncer.borrow_mut().trigger();
    }

    /// Time until the scheduled pass is due, if one is scheduled
    pub fn time_until_update(&self) -> Option<Duration> {
        self.debouncer.borrow().remaining()
    }

    /// Run a pass if the debounced request is due or a failed render is waiting for retry
    ///
    /// Returns `true` if a pass ran.
    pub fn tick(&self) -> bool {
        let debounced = self.debouncer.borrow_mut().take_ready();
        let retry = std::mem::take(&mut self.state.borrow_mut().retry_pending);
        if debounced || retry {
            self.update_now();
            true
        } else {
            false
        }
    }

    /// Jump so the top of `page` is at the top of the viewport
    ///
    /// Near the end of the document the offset stops where the last page
    /// fills the bottom of the container.
    pub fn scroll_to_page(&self, page: PageNumber) -> bool {
        let Some(top) = self.layout.page_top(page) else {
            return false;
        };
        let state = self.viewport.snapshot();
        let scale = state.scale();
        let max = self.layout.max_scroll(scale, state.container_width, state.container_height);
        self.viewport.set_scroll(ScrollOffset::new(state.scroll.x.min(max.x), (top * scale).min(max.y)));
        self.request_update();
        true
    }

    /// Recompute windows and drive the render cache immediately
    pub fn update_now(&self) {
        self.debouncer.borrow_mut().cancel();
        if self.state.borrow().closed {
            return;
        }

        let viewport = self.viewport.snapshot();
        let scale = viewport.scale();
        let Some(visible) = self.layout.visible_range(viewport.scroll.y, viewport.container_height, scale)
        else {
            return;
        };

        let page_count = self.layout.page_count();
        let windows = ScrollWindows {
            visible,
            prefetch: visible.expand(self.config.prefetch_pages, page_count),
            retention: visible.expand(self.config.prefetch_pages + self.config.retention_margin, page_count),
        };
        let tier = ScaleTier::nearest(scale as f32);

        self.cache.set_pinned_window(Some(windows.prefetch));

        let mut events = Vec::new();
        let mut to_render = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            if state.windows != Some(windows) {
                state.windows = Some(windows);
                events.push(ScrollerEvent::WindowChanged(windows));
            }
            let tier_changed = state.tier.replace(tier) != Some(tier);
            if tier_changed {
                debug!("active tier is now {tier}");
                state.retries.clear();
            }

            for page in 1..=page_count {
                let current = state.page(page);
                if !windows.retention.contains(page) {
                    self.leave_retention(&mut state, page, current, &mut events);
                } else if !windows.prefetch.contains(page) {
                    self.leave_prefetch(&mut state, page, current, &mut events);
                } else {
                    if let (node, true) = state.nodes.acquire(page) {
                        events.push(ScrollerEvent::NodeAssigned { page, node });
                    }
                    let needs_render = match current {
                        PageState::Failed => tier_changed,
                        PageState::Rendering => {
                            !state.requests.contains_key(&page) || self.cache.in_flight_tier(page) != Some(tier)
                        }
                        PageState::Resident => self.cache.resident_tier(page) != Some(tier),
                        PageState::Unseen | PageState::Evicted | PageState::Prefetched => true,
                    };
                    if needs_render {
                        if current != PageState::Rendering {
                            state.set(page, PageState::Prefetched);
                        }
                        to_render.push(page);
                    }
                }
            }
        }

        to_render.sort_by_key(|page| (visible.distance(*page), *page));
        for page in to_render {
            self.request(page, tier, &mut events);
        }

        let mut evicted = self.cache.take_reclaimed();
        evicted.extend(self.cache.evict_to_budget());
        self.state.borrow_mut().reclaim(&evicted, &mut events);

        emit(&self.listeners, &events);
    }

    fn leave_retention(
        &self,
        state: &mut ScrollerState,
        page: PageNumber,
        current: PageState,
        events: &mut Vec<ScrollerEvent>,
    ) {
        if state.requests.remove(&page).is_some() {
            self.cache.cancel(page);
        }
        if let Some(node) = state.nodes.release(page) {
            events.push(ScrollerEvent::NodeReleased { page, node });
        }
        if current.is_materialized() {
            state.set(page, PageState::Evicted);
            state.retries.record_success(page);
            events.push(ScrollerEvent::PageEvicted { page });
        }
    }

    fn leave_prefetch(
        &self,
        state: &mut ScrollerState,
        page: PageNumber,
        current: PageState,
        events: &mut Vec<ScrollerEvent>,
    ) {
        let evict = match current {
            PageState::Rendering => {
                if state.requests.remove(&page).is_some() {
                    self.cache.cancel(page);
                }
                debug!("page {page} left the prefetch window mid-render");
                true
            }
            PageState::Prefetched => true,
            PageState::Resident => self.cache.resident_tier(page).is_none(),
            PageState::Unseen | PageState::Evicted | PageState::Failed => false,
        };
        if evict {
            state.set(page, PageState::Evicted);
            events.push(ScrollerEvent::PageEvicted { page });
        }
    }

    fn request(&self, page: PageNumber, tier: ScaleTier, events: &mut Vec<ScrollerEvent>) {
        let scale = tier.scale();

        if self.cache.touch(page, tier) {
            let mut state = self.state.borrow_mut();
            state.requests.remove(&page);
            state.set(page, PageState::Resident);
            state.retries.record_success(page);
            events.push(ScrollerEvent::PageResident { page, tier });
            return;
        }

        let render = self.cache.ensure(page, scale);
        let request_id = {
            let mut state = self.state.borrow_mut();
            state.next_request += 1;
            let request_id = state.next_request;
            state.requests.insert(page, request_id);
            state.set(page, PageState::Rendering);
            request_id
        };
        events.push(ScrollerEvent::PageRendering { page, tier });

        let completion = Completion {
            state: Rc::downgrade(&self.state),
            cache: Rc::downgrade(&self.cache),
            listeners: Rc::clone(&self.listeners),
            page,
            tier,
            request_id,
        };
        let task = await_render(completion, render);
        if let Err(error) = self.spawner.spawn_local(task) {
            warn!("cannot schedule render of page {page}: {error}");
            self.cache.cancel(page);
            let mut state = self.state.borrow_mut();
            state.requests.remove(&page);
            state.set(page, PageState::Prefetched);
            state.retry_pending = true;
        }
    }

    /// Cancel in-flight work, release every node and stop reacting to updates
    pub fn close(&self) {
        let (requests, released) = {
            let mut state = self.state.borrow_mut();
            state.closed = true;
            state.windows = None;
            state.tier = None;
            state.retry_pending = false;
            state.pages.iter_mut().for_each(|page| *page = PageState::Unseen);
            let requests: Vec<_> = state.requests.drain().map(|(page, _)| page).collect();
            (requests, state.nodes.release_all())
        };

        for page in requests {
            self.cache.cancel(page);
        }
        self.cache.set_pinned_window(None);
        self.debouncer.borrow_mut().cancel();

        let events: Vec<_> =
            released.into_iter().map(|(page, node)| ScrollerEvent::NodeReleased { page, node }).collect();
        emit(&self.listeners, &events);
        self.listeners.borrow_mut().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn page_state(&self, page: PageNumber) -> Option<PageState> {
        let state = self.state.borrow();
        page.checked_sub(1).and_then(|index| state.pages.get(index as usize)).copied()
    }

    /// Every page with its state, in page order
    pub fn page_states(&self) -> Vec<(PageNumber, PageState)> {
        let state = self.state.borrow();
        state.pages.iter().enumerate().map(|(index, page)| (index as PageNumber + 1, *page)).collect()
    }

    /// Pages currently in `wanted`, ascending
    pub fn pages_in(&self, wanted: PageState) -> Vec<PageNumber> {
        self.page_states().into_iter().filter(|(_, state)| *state == wanted).map(|(page, _)| page).collect()
    }

    pub fn windows(&self) -> Option<ScrollWindows> {
        self.state.borrow().windows
    }

    pub fn active_tier(&self) -> Option<ScaleTier> {
        self.state.borrow().tier
    }

    /// Page under the vertical center of the viewport
    pub fn current_page(&self) -> Option<PageNumber> {
        let viewport = self.viewport.snapshot();
        self.layout.current_page(viewport.scroll.y, viewport.container_height, viewport.scale())
    }

    pub fn node_for(&self, page: PageNumber) -> Option<NodeId> {
        self.state.borrow().nodes.node_for(page)
    }

    /// Pages holding a node, ascending
    pub fn assigned_pages(&self) -> Vec<PageNumber> {
        self.state.borrow().nodes.assigned_pages()
    }

    /// Nodes ever created by the pool
    pub fn nodes_created(&self) -> u32 {
        self.state.borrow().nodes.created_count()
    }
}
