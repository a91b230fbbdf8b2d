use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::coords::{self, DocPoint, ViewportPoint};
use crate::zoom::{clamp_zoom, DEFAULT_ZOOM_PERCENT};

/// Scroll position in viewport pixels. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollOffset {
    pub x: f64,
    pub y: f64,
}

impl ScrollOffset {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn clamped(self) -> Self {
        let clamp = |value: f64| if value.is_finite() { value.max(0.0) } else { 0.0 };
        Self { x: clamp(self.x), y: clamp(self.y) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportState {
    pub zoom_percent: f64,
    pub scroll: ScrollOffset,
    pub container_width: f64,
    pub container_height: f64,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            zoom_percent: DEFAULT_ZOOM_PERCENT,
            scroll: ScrollOffset::default(),
            container_width: 1280.0,
            container_height: 800.0,
        }
    }
}

impl ViewportState {
    pub fn scale(&self) -> f64 {
        coords::scale_from_percent(self.zoom_percent)
    }

    /// Maps a continuous document point to its on-screen position.
    pub fn doc_to_viewport(&self, point: DocPoint) -> ViewportPoint {
        let scaled = coords::to_viewport(point, self.scale());
        ViewportPoint::new(scaled.x - self.scroll.x, scaled.y - self.scroll.y)
    }

    pub fn viewport_to_doc(&self, point: ViewportPoint) -> DocPoint {
        coords::to_document(
            ViewportPoint::new(point.x + self.scroll.x, point.y + self.scroll.y),
            self.scale(),
        )
    }

    /// Document point under the middle of the container.
    pub fn center_doc_point(&self) -> DocPoint {
        self.viewport_to_doc(ViewportPoint::new(self.container_width / 2.0, self.container_height / 2.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewportChange {
    Zoom { previous: f64, current: f64 },
    Scroll,
    Resize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Rc<dyn Fn(&ViewportState, ViewportChange)>;

/// Shared zoom/scroll/container state with observer callbacks.
///
/// Listeners run after the state is updated and without any borrow held, so they
/// may read the store or mutate it again.
#[derive(Default)]
pub struct ViewportStore {
    state: RefCell<ViewportState>,
    listeners: RefCell<Vec<(SubscriptionId, Listener)>>,
    next_id: Cell<u64>,
}

pub type SharedViewport = Rc<ViewportStore>;

impl ViewportStore {
    pub fn new(state: ViewportState) -> Self {
        let state = ViewportState {
            zoom_percent: clamp_zoom(state.zoom_percent),
            scroll: state.scroll.clamped(),
            ..state
        };
        Self { state: RefCell::new(state), ..Self::default() }
    }

    pub fn shared(state: ViewportState) -> SharedViewport {
        Rc::new(Self::new(state))
    }

    pub fn snapshot(&self) -> ViewportState {
        self.state.borrow().clone()
    }

    pub fn zoom_percent(&self) -> f64 {
        self.state.borrow().zoom_percent
    }

    pub fn scale(&self) -> f64 {
        self.state.borrow().scale()
    }

    pub fn scroll(&self) -> ScrollOffset {
        self.state.borrow().scroll
    }

    pub fn subscribe(&self, listener: impl Fn(&ViewportState, ViewportChange) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn set_scroll(&self, scroll: ScrollOffset) -> bool {
        let changed = {
            let mut state = self.state.borrow_mut();
            let scroll = scroll.clamped();
            let changed = state.scroll != scroll;
            state.scroll = scroll;
            changed
        };
        if changed {
            self.notify(ViewportChange::Scroll);
        }
        changed
    }

    /// Sets zoom and scroll together so listeners observe one consistent change.
    pub fn set_zoom(&self, zoom_percent: f64, scroll: ScrollOffset) -> bool {
        let change = {
            let mut state = self.state.borrow_mut();
            let previous = state.zoom_percent;
            let current = clamp_zoom(zoom_percent);
            let scroll = scroll.clamped();

            let change = if previous != current {
                Some(ViewportChange::Zoom { previous, current })
            } else if state.scroll != scroll {
                Some(ViewportChange::Scroll)
            } else {
                None
            };
            state.zoom_percent = current;
            state.scroll = scroll;
            change
        };

        match change {
            Some(change) => {
                self.notify(change);
                true
            }
            None => false,
        }
    }

    pub fn set_container(&self, width: f64, height: f64) -> bool {
        let changed = {
            let mut state = self.state.borrow_mut();
            let width = width.max(0.0);
            let height = height.max(0.0);
            let changed = state.container_width != width || state.container_height != height;
            state.container_width = width;
            state.container_height = height;
            changed
        };
        if changed {
            self.notify(ViewportChange::Resize);
        }
        changed
    }

    fn notify(&self, change: ViewportChange) {
        let listeners: Vec<Listener> =
            self.listeners.borrow().iter().map(|(_, listener)| Rc::clone(listener)).collect();
        let state = self.snapshot();
        for listener in listeners {
            listener(&state, change);
        }
    }
}
