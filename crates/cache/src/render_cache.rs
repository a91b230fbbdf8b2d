//! Byte-bounded cache of rendered page surfaces
//!
//! Holds at most one surface per page, rendered at a [`ScaleTier`]. Requests are
//! deduplicated while in flight, superseded requests are marked stale through
//! cancellation tokens, and least-recently-used surfaces outside the pinned
//! prefetch window are evicted whenever resident bytes exceed the budget.
//!
//! The cache is single-threaded: all state lives behind one `Rc<RefCell<_>>`
//! and is only touched from the thread that owns the cache. Completion runs
//! inside the returned future, so results are stored by whoever drives it.
//!
//! # Example
//!
//! ```
//! use doc_model::synthetic::SyntheticEngine;
//! use doc_model::PageSize;
//! use docview_cache::{CacheBudget, RenderCache};
//! use futures::executor::block_on;
//! use std::rc::Rc;
//!
//! let engine = Rc::new(SyntheticEngine::uniform(10, PageSize::new(100.0, 100.0)));
//! let cache = RenderCache::new(engine.clone(), CacheBudget::default());
//!
//! let surface = block_on(cache.ensure(3, 1.0)).unwrap();
//! assert_eq!((surface.width, surface.height), (100, 100));
//! assert_eq!(cache.resident_pages(), vec![3]);
//! ```

use doc_model::{DocumentEngine, EngineError, PageHandle, PageNumber, PageRange, Surface};
use docview_scheduler::{CancellationRegistry, CancellationToken};
use futures::future::{self, FutureExt, LocalBoxFuture, Shared, WeakShared};
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config::CacheBudget;
use crate::stats::CacheStats;
use crate::tier::{cap_scale, ScaleTier};

/// Default number of thumbnails kept.
pub const DEFAULT_MAX_THUMBNAILS: usize = 64;

/// Result of an [`RenderCache::ensure`] or [`RenderCache::generate_thumbnail`] call.
///
/// Cloneable; every clone resolves to the same surface.
pub type SurfaceFuture = Shared<LocalBoxFuture<'static, Result<Rc<Surface>, RenderError>>>;

type WeakSurfaceFuture = WeakShared<LocalBoxFuture<'static, Result<Rc<Surface>, RenderError>>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("rasterization failed: {0}")]
    Rasterization(#[from] EngineError),
    #[error("render of page {page} was superseded")]
    Stale { page: PageNumber },
}

impl RenderError {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

struct CacheEntry {
    tier: ScaleTier,
    surface: Rc<Surface>,
    last_access: u64,
}

struct InFlight {
    tier: ScaleTier,
    future: SurfaceFuture,
}

struct ThumbnailEntry {
    max_width: u32,
    surface: Rc<Surface>,
    last_access: u64,
}

struct CacheState {
    engine: Rc<dyn DocumentEngine>,
    budget: CacheBudget,
    entries: HashMap<PageNumber, CacheEntry>,
    in_flight: HashMap<PageNumber, InFlight>,
    tokens: CancellationRegistry<PageNumber>,
    thumbnails: HashMap<PageNumber, ThumbnailEntry>,
    /// Held weakly: a thumbnail nobody awaits any more is dropped from the table
    thumbnails_in_flight: HashMap<PageNumber, (u32, WeakSurfaceFuture)>,
    max_thumbnails: usize,
    pinned: Option<PageRange>,
    /// Pages evicted while storing a completed render, until taken by the owner
    reclaimed: BTreeSet<PageNumber>,
    total_bytes: usize,
    access_counter: u64,
    /// Bumped by `clear` so thumbnail completions from before an unload are dropped
    generation: u64,
    stats: CacheStats,
}

/// Memory-bounded render cache
pub struct RenderCache {
    state: Rc<RefCell<CacheState>>,
}

fn ready(result: Result<Rc<Surface>, RenderError>) -> SurfaceFuture {
    future::ready(result).boxed_local().shared()
}

impl RenderCache {
    /// Create a cache rendering through `engine` within `budget`
    pub fn new(engine: Rc<dyn DocumentEngine>, budget: CacheBudget) -> Self {
        Self::with_max_thumbnails(engine, budget, DEFAULT_MAX_THUMBNAILS)
    }

    /// Create a cache with a custom thumbnail table size
    pub fn with_max_thumbnails(
        engine: Rc<dyn DocumentEngine>,
        budget: CacheBudget,
        max_thumbnails: usize,
    ) -> Self {
        let state = CacheState {
            engine,
            budget,
            entries: HashMap::new(),
            in_flight: HashMap::new(),
            tokens: CancellationRegistry::new(),
            thumbnails: HashMap::new(),
            thumbnails_in_flight: HashMap::new(),
            max_thumbnails: max_thumbnails.max(1),
            pinned: None,
            reclaimed: BTreeSet::new(),
            total_bytes: 0,
            access_counter: 0,
            generation: 0,
            stats: CacheStats { byte_limit: budget.byte_limit(), ..CacheStats::default() },
        };
        Self { state: Rc::new(RefCell::new(state)) }
    }

    /// Get a surface for `page` at the tier nearest `scale`
    ///
    /// Resident surfaces resolve immediately and count as an access. A request
    /// already in flight for the same tier is shared rather than duplicated. A
    /// request for another tier drops the page's resident surface and marks
    /// any older in-flight request stale.
    pub fn ensure(&self, page: PageNumber, scale: f32) -> SurfaceFuture {
        let tier = ScaleTier::nearest(scale);
        let mut state = self.state.borrow_mut();

        if let Some(surface) = state.touch(page, tier) {
            return ready(Ok(surface));
        }

        let attached = state
            .in_flight
            .get(&page)
            .filter(|request| request.tier == tier)
            .map(|request| request.future.clone());
        if let Some(future) = attached {
            state.stats.dedup_hits += 1;
            debug!("page {page} at {tier} already in flight, attaching");
            return future;
        }

        state.stats.misses += 1;
        state.invalidate(page);

        let handle = match state.engine.get_page(page) {
            Ok(handle) => handle,
            Err(error) => {
                state.stats.failures += 1;
                warn!("cannot render page {page}: {error}");
                return ready(Err(error.into()));
            }
        };

        let requested = tier.scale();
        let render_scale = cap_scale(handle.size, requested, state.budget.max_canvas_pixels);
        if render_scale < requested {
            state.stats.downshifts += 1;
            debug!(
                "downshifting page {page} from {requested} to {render_scale} (max_canvas_pixels={})",
                state.budget.max_canvas_pixels
            );
        }

        let token = state.tokens.register(page);
        state.stats.rasterizations += 1;
        let engine = Rc::clone(&state.engine);
        drop(state);

        let future = self.spawn_render(engine, handle, render_scale, tier, token);
        self.state
            .borrow_mut()
            .in_flight
            .insert(page, InFlight { tier, future: future.clone() });
        future
    }

    fn spawn_render(
        &self,
        engine: Rc<dyn DocumentEngine>,
        handle: PageHandle,
        render_scale: f32,
        tier: ScaleTier,
        token: CancellationToken,
    ) -> SurfaceFuture {
        let render = engine.render_page(&handle, render_scale);
        let weak: Weak<RefCell<CacheState>> = Rc::downgrade(&self.state);
        let page = handle.page;

        async move {
            let result = render.await;
            match weak.upgrade() {
                Some(state) => state.borrow_mut().complete(page, tier, &token, result),
                None => Err(RenderError::Stale { page }),
            }
        }
        .boxed_local()
        .shared()
    }

    /// Get a thumbnail of `page` no wider than `max_width`
    ///
    /// Thumbnails render at [`ScaleTier::THUMBNAIL`], reduced further to fit,
    /// and live in their own count-bounded table outside the byte budget.
    pub fn generate_thumbnail(&self, page: PageNumber, max_width: u32) -> SurfaceFuture {
        let mut state = self.state.borrow_mut();

        if let Some(surface) = state.touch_thumbnail(page, max_width) {
            return ready(Ok(surface));
        }

        state.thumbnails_in_flight.retain(|_, (_, pending)| pending.upgrade().is_some());
        let attached = state
            .thumbnails_in_flight
            .get(&page)
            .filter(|(width, _)| *width == max_width)
            .and_then(|(_, pending)| pending.upgrade());
        if let Some(future) = attached {
            debug!("thumbnail of page {page} already in flight, attaching");
            return future;
        }

        let handle = match state.engine.get_page(page) {
            Ok(handle) => handle,
            Err(error) => {
                state.stats.failures += 1;
                warn!("cannot render thumbnail of page {page}: {error}");
                return ready(Err(error.into()));
            }
        };

        let mut scale = ScaleTier::THUMBNAIL.scale();
        if max_width > 0 && handle.size.width * scale > max_width as f32 {
            scale = max_width as f32 / handle.size.width;
        }
        let scale = cap_scale(handle.size, scale, state.budget.max_canvas_pixels);

        state.stats.rasterizations += 1;
        let generation = state.generation;
        let engine = Rc::clone(&state.engine);
        drop(state);

        let render = engine.render_page(&handle, scale);
        let weak = Rc::downgrade(&self.state);
        let future = async move {
            let result = render.await;
            match weak.upgrade() {
                Some(state) => state.borrow_mut().complete_thumbnail(page, max_width, generation, result),
                None => Err(RenderError::Stale { page }),
            }
        }
        .boxed_local()
        .shared();

        if let Some(pending) = future.downgrade() {
            self.state.borrow_mut().thumbnails_in_flight.insert(page, (max_width, pending));
        }
        future
    }

    /// Resident surface for `page`, without counting an access
    pub fn peek(&self, page: PageNumber) -> Option<Rc<Surface>> {
        self.state.borrow().entries.get(&page).map(|entry| Rc::clone(&entry.surface))
    }

    /// Count an access to the resident surface of `page` if it is at `tier`
    ///
    /// Returns `false` when the page is not resident at that tier.
    pub fn touch(&self, page: PageNumber, tier: ScaleTier) -> bool {
        self.state.borrow_mut().touch(page, tier).is_some()
    }

    /// Cached thumbnail for `page`, without counting an access
    pub fn thumbnail(&self, page: PageNumber) -> Option<Rc<Surface>> {
        self.state.borrow().thumbnails.get(&page).map(|entry| Rc::clone(&entry.surface))
    }

    /// Tier of the resident surface for `page`
    pub fn resident_tier(&self, page: PageNumber) -> Option<ScaleTier> {
        self.state.borrow().entries.get(&page).map(|entry| entry.tier)
    }

    /// Tier of the live in-flight request for `page`
    pub fn in_flight_tier(&self, page: PageNumber) -> Option<ScaleTier> {
        self.state.borrow().in_flight.get(&page).map(|request| request.tier)
    }

    pub fn is_in_flight(&self, page: PageNumber) -> bool {
        self.state.borrow().in_flight.contains_key(&page)
    }

    /// Pin `window` so none of its pages are evicted; `None` unpins everything
    ///
    /// The pinned window wins over the byte budget: if pinned surfaces alone
    /// exceed it, eviction stops short and the cache overshoots until the
    /// window moves.
    pub fn set_pinned_window(&self, window: Option<PageRange>) {
        self.state.borrow_mut().pinned = window;
    }

    pub fn pinned_window(&self) -> Option<PageRange> {
        self.state.borrow().pinned
    }

    /// Mark the in-flight request for `page` stale
    ///
    /// Returns `true` if a request was in flight. Its result will be discarded.
    pub fn cancel(&self, page: PageNumber) -> bool {
        self.state.borrow_mut().cancel(page)
    }

    /// Drop the resident surface for `page` and cancel its in-flight request
    pub fn release(&self, page: PageNumber) -> bool {
        let mut state = self.state.borrow_mut();
        let cancelled = state.cancel(page);
        let removed = state.remove_entry(page).is_some();
        cancelled || removed
    }

    /// Evict least-recently-used unpinned surfaces until within budget
    ///
    /// Returns the evicted pages, oldest first.
    pub fn evict_to_budget(&self) -> Vec<PageNumber> {
        self.state.borrow_mut().evict_to_budget()
    }

    /// Take the pages evicted while storing completed renders
    ///
    /// Only pages still without a resident surface are returned, ascending.
    pub fn take_reclaimed(&self) -> Vec<PageNumber> {
        std::mem::take(&mut self.state.borrow_mut().reclaimed).into_iter().collect()
    }

    /// Release every surface, thumbnail and in-flight request (document unload)
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        let cancelled = state.tokens.cancel_all();
        state.in_flight.clear();
        state.entries.clear();
        state.thumbnails.clear();
        state.thumbnails_in_flight.clear();
        state.pinned = None;
        state.reclaimed.clear();
        state.total_bytes = 0;
        state.generation = state.generation.wrapping_add(1);
        debug!("render cache cleared ({cancelled} in-flight requests cancelled)");
    }

    pub fn total_size_bytes(&self) -> usize {
        self.state.borrow().total_bytes
    }

    pub fn byte_limit(&self) -> usize {
        self.state.borrow().budget.byte_limit()
    }

    pub fn budget(&self) -> CacheBudget {
        self.state.borrow().budget
    }

    /// Pages with a resident surface, ascending
    pub fn resident_pages(&self) -> Vec<PageNumber> {
        let mut pages: Vec<_> = self.state.borrow().entries.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.borrow();
        CacheStats {
            resident_pages: state.entries.len(),
            resident_bytes: state.total_bytes,
            byte_limit: state.budget.byte_limit(),
            thumbnails: state.thumbnails.len(),
            ..state.stats
        }
    }
}

impl fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("RenderCache")
            .field("resident_pages", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .field("total_bytes", &state.total_bytes)
            .field("byte_limit", &state.budget.byte_limit())
            .field("pinned", &state.pinned)
            .finish()
    }
}

impl CacheState {
    fn next_access(&mut self) -> u64 {
        self.access_counter = self.access_counter.wrapping_add(1);
        self.access_counter
    }

    fn touch(&mut self, page: PageNumber, tier: ScaleTier) -> Option<Rc<Surface>> {
        if self.entries.get(&page)?.tier != tier {
            return None;
        }
        let access = self.next_access();
        let entry = self.entries.get_mut(&page)?;
        entry.last_access = access;
        let surface = Rc::clone(&entry.surface);
        self.stats.hits += 1;
        Some(surface)
    }

    fn touch_thumbnail(&mut self, page: PageNumber, max_width: u32) -> Option<Rc<Surface>> {
        if self.thumbnails.get(&page)?.max_width != max_width {
            return None;
        }
        let access = self.next_access();
        let entry = self.thumbnails.get_mut(&page)?;
        entry.last_access = access;
        Some(Rc::clone(&entry.surface))
    }

    /// Drops whatever the cache holds for `page` ahead of a request at another tier.
    fn invalidate(&mut self, page: PageNumber) {
        if let Some(entry) = self.remove_entry(page) {
            debug!("invalidating page {page} at {}", entry.tier);
        }
        if self.cancel(page) {
            debug!("marking previous render of page {page} stale");
        }
    }

    fn cancel(&mut self, page: PageNumber) -> bool {
        let had_request = self.in_flight.remove(&page).is_some();
        let had_token = self.tokens.cancel(page);
        had_request || had_token
    }

    fn remove_entry(&mut self, page: PageNumber) -> Option<CacheEntry> {
        let entry = self.entries.remove(&page)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.surface.size_bytes());
        Some(entry)
    }

    fn complete(
        &mut self,
        page: PageNumber,
        tier: ScaleTier,
        token: &CancellationToken,
        result: Result<Surface, EngineError>,
    ) -> Result<Rc<Surface>, RenderError> {
        let live = self.tokens.complete(page, token);
        if live {
            self.in_flight.remove(&page);
        }
        if !live || token.is_cancelled() {
            self.stats.stale_discards += 1;
            debug!("discarding stale render of page {page} at {tier}");
            return Err(RenderError::Stale { page });
        }

        match result {
            Ok(surface) => {
                let surface = Rc::new(surface);
                let last_access = self.next_access();
                self.remove_entry(page);
                self.total_bytes += surface.size_bytes();
                self.entries.insert(page, CacheEntry { tier, surface: Rc::clone(&surface), last_access });
                self.reclaimed.remove(&page);
                let evicted = self.evict_to_budget();
                self.reclaimed.extend(evicted);
                Ok(surface)
            }
            Err(error) => {
                self.stats.failures += 1;
                warn!("rasterization of page {page} at {tier} failed: {error}");
                Err(error.into())
            }
        }
    }

    fn complete_thumbnail(
        &mut self,
        page: PageNumber,
        max_width: u32,
        generation: u64,
        result: Result<Surface, EngineError>,
    ) -> Result<Rc<Surface>, RenderError> {
        if generation != self.generation {
            self.stats.stale_discards += 1;
            debug!("discarding thumbnail of page {page} from an unloaded document");
            return Err(RenderError::Stale { page });
        }
        if self.thumbnails_in_flight.get(&page).is_some_and(|(width, _)| *width == max_width) {
            self.thumbnails_in_flight.remove(&page);
        }

        match result {
            Ok(surface) => {
                let surface = Rc::new(surface);
                let last_access = self.next_access();
                self.thumbnails
                    .insert(page, ThumbnailEntry { max_width, surface: Rc::clone(&surface), last_access });
                while self.thumbnails.len() > self.max_thumbnails {
                    let oldest = self
                        .thumbnails
                        .iter()
                        .min_by_key(|(_, entry)| entry.last_access)
                        .map(|(page, _)| *page);
                    let Some(oldest) = oldest else {
                        break;
                    };
                    self.thumbnails.remove(&oldest);
                    trace!("evicted thumbnail of page {oldest}");
                }
                Ok(surface)
            }
            Err(error) => {
                self.stats.failures += 1;
                warn!("thumbnail of page {page} failed: {error}");
                Err(error.into())
            }
        }
    }

    fn evict_to_budget(&mut self) -> Vec<PageNumber> {
        let limit = self.budget.byte_limit();
        let pinned = self.pinned;
        let mut evicted = Vec::new();

        while self.total_bytes > limit {
            let candidate = self
                .entries
                .iter()
                .filter(|(page, _)| !pinned.is_some_and(|window| window.contains(**page)))
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(page, _)| *page);

            let Some(page) = candidate else {
                debug!(
                    "pinned window {pinned:?} holds {} bytes, over the {limit} byte limit",
                    self.total_bytes
                );
                break;
            };

            if let Some(entry) = self.remove_entry(page) {
                self.stats.evictions += 1;
                trace!("evicted page {page} at {} ({} bytes)", entry.tier, entry.surface.size_bytes());
                evicted.push(page);
            }
        }

        evicted
    }
}
