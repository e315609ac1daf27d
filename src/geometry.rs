//! Document-space geometry and a scrollable viewport model.
//!
//! [`GeometryTracker`] is the reference [`IntersectionProvider`]: embedders
//! place target rectangles in document coordinates, scroll the viewport, and
//! the tracker reports threshold crossings to whatever sink observes them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::intersection::{
    IntersectionEntry, IntersectionProvider, IntersectionSink, ObserverOptions, ViewportObserver,
};

/// Axis-aligned rectangle in document coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Overlapping region with `other`, or `None` when the rects are disjoint
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right > x && bottom > y {
            Some(Rect {
                x,
                y,
                width: right - x,
                height: bottom - y,
            })
        } else {
            None
        }
    }
}

/// Per-edge expansion applied to the viewport before intersection tests.
///
/// Positive values grow the viewport (targets report visibility before they
/// reach the window), negative values shrink it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Margin {
    /// Same expansion on all four edges
    pub fn uniform(px: f32) -> Self {
        Self {
            top: px,
            right: px,
            bottom: px,
            left: px,
        }
    }

    /// `rect` grown by this margin. Degenerate results collapse to an empty
    /// rect rather than one with negative extent.
    pub fn expand(&self, rect: &Rect) -> Rect {
        Rect {
            x: rect.x - self.left,
            y: rect.y - self.top,
            width: (rect.width + self.left + self.right).max(0.0),
            height: (rect.height + self.top + self.bottom).max(0.0),
        }
    }
}

/// Fraction of `target` covered by the margin-expanded `viewport`, in [0, 1]
fn coverage(viewport: &Rect, margin: &Margin, target: &Rect) -> f32 {
    if target.area() <= 0.0 {
        return 0.0;
    }
    let root = margin.expand(viewport);
    target
        .intersect(&root)
        .map(|overlap| (overlap.area() / target.area()).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

/// Whether moving from `last` to `now` warrants a report: any configured
/// threshold was crossed, or the target flipped between intersecting and not.
fn crossed(last: f32, now: f32, thresholds: &[f32]) -> bool {
    if (last > 0.0) != (now > 0.0) {
        return true;
    }
    thresholds
        .iter()
        .any(|&t| (last < t && now >= t) || (last >= t && now < t))
}

struct ObserverSlot {
    id: u64,
    options: ObserverOptions,
    sink: IntersectionSink,
    /// Watched target id to the last reported ratio. `None` until the first
    /// report goes out.
    watched: HashMap<String, Option<f32>>,
}

struct TrackerState {
    /// Origin is the scroll offset, size is the window
    viewport: Rect,
    targets: HashMap<String, Rect>,
    observers: Vec<ObserverSlot>,
    next_observer: u64,
}

struct TrackerShared {
    state: Mutex<TrackerState>,
}

impl TrackerShared {
    /// Recompute every watched target, collect per-observer batches under the
    /// lock, then deliver with the lock released. Sinks are allowed to call
    /// straight back into observers.
    fn refresh(&self) {
        let batches = {
            let mut guard = self.state.lock().unwrap();
            let TrackerState {
                viewport,
                targets,
                observers,
                ..
            } = &mut *guard;
            let mut batches: Vec<(IntersectionSink, Vec<IntersectionEntry>)> = Vec::new();
            for slot in observers.iter_mut() {
                let mut entries = Vec::new();
                for (id, last) in &mut slot.watched {
                    let Some(rect) = targets.get(id) else {
                        continue;
                    };
                    let ratio = coverage(viewport, &slot.options.margin, rect);
                    let notify = match *last {
                        Some(prev) => crossed(prev, ratio, &slot.options.thresholds),
                        None => true,
                    };
                    if notify {
                        *last = Some(ratio);
                        entries.push(IntersectionEntry::new(id.clone(), ratio));
                    }
                }
                if !entries.is_empty() {
                    batches.push((slot.sink.clone(), entries));
                }
            }
            batches
        };

        for (sink, entries) in batches {
            sink.deliver(entries);
        }
    }

    /// Initial report for a single freshly observed target
    fn report_one(&self, observer: u64, target: &str) {
        let (sink, entries) = {
            let mut state = self.state.lock().unwrap();
            let viewport = state.viewport;
            let rect = state.targets.get(target).copied();
            let Some(slot) = state.observers.iter_mut().find(|s| s.id == observer) else {
                return;
            };
            let Some(rect) = rect else {
                // Target not placed yet; the first refresh after placement
                // reports it.
                return;
            };
            let Some(last) = slot.watched.get_mut(target) else {
                return;
            };
            let ratio = coverage(&viewport, &slot.options.margin, &rect);
            *last = Some(ratio);
            (
                slot.sink.clone(),
                vec![IntersectionEntry::new(target.to_string(), ratio)],
            )
        };
        sink.deliver(entries);
    }
}

/// Scrollable viewport over a set of placed targets.
///
/// Cheap to clone; all clones share the same document.
#[derive(Clone)]
pub struct GeometryTracker {
    shared: Arc<TrackerShared>,
}

impl GeometryTracker {
    /// Tracker with a viewport of the given size, scrolled to the origin
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                state: Mutex::new(TrackerState {
                    viewport: Rect::new(0.0, 0.0, width, height),
                    targets: HashMap::new(),
                    observers: Vec::new(),
                    next_observer: 1,
                }),
            }),
        }
    }

    /// Move the viewport origin to `(x, y)` and report resulting crossings
    pub fn scroll_to(&self, x: f32, y: f32) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.viewport.x = x;
            state.viewport.y = y;
        }
        self.shared.refresh();
    }

    /// Resize the window and report resulting crossings
    pub fn set_viewport_size(&self, width: f32, height: f32) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.viewport.width = width;
            state.viewport.height = height;
        }
        self.shared.refresh();
    }

    /// Place or move a target rectangle in document coordinates
    pub fn set_target_bounds(&self, id: impl Into<String>, rect: Rect) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.targets.insert(id.into(), rect);
        }
        self.shared.refresh();
    }

    /// Remove a target from the document
    pub fn clear_target(&self, id: &str) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.targets.remove(id);
        }
        self.shared.refresh();
    }

    pub fn viewport(&self) -> Rect {
        self.shared.state.lock().unwrap().viewport
    }

    pub fn scroll_position(&self) -> (f32, f32) {
        let state = self.shared.state.lock().unwrap();
        (state.viewport.x, state.viewport.y)
    }
}

impl IntersectionProvider for GeometryTracker {
    fn create_observer(
        &self,
        options: ObserverOptions,
        sink: IntersectionSink,
    ) -> Arc<dyn ViewportObserver> {
        let id = {
            let mut state = self.shared.state.lock().unwrap();
            let id = state.next_observer;
            state.next_observer += 1;
            state.observers.push(ObserverSlot {
                id,
                options,
                sink,
                watched: HashMap::new(),
            });
            id
        };
        Arc::new(TrackerObserver {
            shared: Arc::downgrade(&self.shared),
            id,
        })
    }
}

struct TrackerObserver {
    shared: Weak<TrackerShared>,
    id: u64,
}

impl ViewportObserver for TrackerObserver {
    fn observe(&self, target: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        {
            let mut state = shared.state.lock().unwrap();
            let Some(slot) = state.observers.iter_mut().find(|s| s.id == self.id) else {
                return;
            };
            slot.watched.entry(target.to_string()).or_insert(None);
        }
        shared.report_one(self.id, target);
    }

    fn unobserve(&self, target: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().unwrap();
        if let Some(slot) = state.observers.iter_mut().find(|s| s.id == self.id) {
            slot.watched.remove(target);
        }
    }

    fn disconnect(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().unwrap();
        state.observers.retain(|s| s.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_overlapping_rects() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(50.0, 50.0, 100.0, 100.0);
        let overlap = a.intersect(&b).unwrap();
        assert_eq!(overlap, Rect::new(50.0, 50.0, 50.0, 50.0));
        assert_eq!(overlap.area(), 2500.0);
    }

    #[test]
    fn intersect_disjoint_rects_is_none() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 0.0, 10.0, 10.0);
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn margin_expands_viewport() {
        let viewport = Rect::new(0.0, 100.0, 800.0, 600.0);
        let grown = Margin::uniform(100.0).expand(&viewport);
        assert_eq!(grown, Rect::new(-100.0, 0.0, 1000.0, 800.0));
    }

    #[test]
    fn negative_margin_never_produces_negative_extent() {
        let viewport = Rect::new(0.0, 0.0, 100.0, 100.0);
        let shrunk = Margin::uniform(-80.0).expand(&viewport);
        assert_eq!(shrunk.width, 0.0);
        assert_eq!(shrunk.height, 0.0);
    }

    #[test]
    fn coverage_is_clamped_fraction_of_target() {
        let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);
        let target = Rect::new(0.0, 500.0, 800.0, 200.0);
        // 100 of 200 rows visible
        assert_eq!(coverage(&viewport, &Margin::default(), &target), 0.5);
        // Fully outside
        let far = Rect::new(0.0, 5000.0, 800.0, 200.0);
        assert_eq!(coverage(&viewport, &Margin::default(), &far), 0.0);
    }

    #[test]
    fn crossing_detects_threshold_and_intersection_flip() {
        let thresholds = [0.0, 0.1, 0.5];
        assert!(crossed(0.05, 0.2, &thresholds));
        assert!(crossed(0.2, 0.05, &thresholds));
        assert!(!crossed(0.2, 0.3, &thresholds));
        // Flip to fully hidden reports even though no threshold strictly
        // crosses at 0.0
        assert!(crossed(0.05, 0.0, &thresholds));
        assert!(crossed(0.0, 0.05, &thresholds));
    }

    fn collecting_sink() -> (IntersectionSink, Arc<Mutex<Vec<IntersectionEntry>>>) {
        let seen: Arc<Mutex<Vec<IntersectionEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink = IntersectionSink::new(move |entries| {
            sink_seen.lock().unwrap().extend(entries);
        });
        (sink, seen)
    }

    #[test]
    fn tracker_reports_initial_state_on_observe() {
        let tracker = GeometryTracker::new(800.0, 600.0);
        tracker.set_target_bounds("clip", Rect::new(0.0, 0.0, 800.0, 300.0));

        let (sink, seen) = collecting_sink();
        let observer = tracker.create_observer(ObserverOptions::default(), sink);
        observer.observe("clip");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].target, "clip");
        assert_eq!(seen[0].ratio, 1.0);
        assert!(seen[0].is_intersecting);
    }

    #[test]
    fn tracker_reports_crossings_on_scroll() {
        let tracker = GeometryTracker::new(800.0, 600.0);
        tracker.set_target_bounds("clip", Rect::new(0.0, 1000.0, 800.0, 200.0));

        let (sink, seen) = collecting_sink();
        let options = ObserverOptions {
            thresholds: vec![0.0, 0.5],
            ..ObserverOptions::default()
        };
        let observer = tracker.create_observer(options, sink);
        observer.observe("clip");
        assert_eq!(seen.lock().unwrap().len(), 1); // initial, ratio 0

        // Half the clip enters the window
        tracker.scroll_to(0.0, 500.0);
        {
            let seen = seen.lock().unwrap();
            let last = seen.last().unwrap();
            assert_eq!(last.ratio, 0.5);
            assert!(last.is_intersecting);
        }

        // Small move that crosses nothing stays quiet
        let count = seen.lock().unwrap().len();
        tracker.scroll_to(0.0, 520.0);
        assert_eq!(seen.lock().unwrap().len(), count);

        // Scroll past; clip leaves entirely
        tracker.scroll_to(0.0, 2000.0);
        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.ratio, 0.0);
        assert!(!last.is_intersecting);
    }

    #[test]
    fn unobserve_and_disconnect_stop_reports() {
        let tracker = GeometryTracker::new(800.0, 600.0);
        tracker.set_target_bounds("a", Rect::new(0.0, 0.0, 100.0, 100.0));
        tracker.set_target_bounds("b", Rect::new(0.0, 200.0, 100.0, 100.0));

        let (sink, seen) = collecting_sink();
        let observer = tracker.create_observer(ObserverOptions::default(), sink);
        observer.observe("a");
        observer.observe("b");
        seen.lock().unwrap().clear();

        observer.unobserve("a");
        tracker.scroll_to(0.0, 10_000.0);
        assert!(seen.lock().unwrap().iter().all(|e| e.target == "b"));

        seen.lock().unwrap().clear();
        observer.disconnect();
        tracker.scroll_to(0.0, 0.0);
        assert!(seen.lock().unwrap().is_empty());
    }
}
