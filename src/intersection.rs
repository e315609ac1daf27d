//! Visibility observation contracts between the coordinator and its platform.
//!
//! The coordinator never reads geometry itself. It asks an
//! [`IntersectionProvider`] for a [`ViewportObserver`], names the targets it
//! cares about, and receives ratio reports through an [`IntersectionSink`].
//! Production embedders bridge these traits to their compositor or windowing
//! layer; [`ManualIntersection`] drives them by hand in tests.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::geometry::Margin;

/// Subscription parameters for a [`ViewportObserver`].
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOptions {
    /// Coverage ratios at which crossings must be reported
    pub thresholds: Vec<f32>,
    /// Expansion applied to the viewport before intersection tests
    pub margin: Margin,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            thresholds: vec![0.0],
            margin: Margin::default(),
        }
    }
}

/// One visibility report for one target
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    /// Handle id of the reported target
    pub target: String,
    /// Fraction of the target inside the expanded viewport, in [0, 1]
    pub ratio: f32,
    /// Whether any part of the target is inside the expanded viewport
    pub is_intersecting: bool,
}

impl IntersectionEntry {
    pub fn new(target: impl Into<String>, ratio: f32) -> Self {
        Self {
            target: target.into(),
            ratio,
            is_intersecting: ratio > 0.0,
        }
    }
}

/// An active visibility subscription.
///
/// All three methods are idempotent. Implementations may report entries
/// synchronously from inside `observe`.
pub trait ViewportObserver: Send + Sync {
    /// Start watching `target`
    fn observe(&self, target: &str);
    /// Stop watching `target`
    fn unobserve(&self, target: &str);
    /// Tear down the whole subscription
    fn disconnect(&self);
}

/// Source of visibility subscriptions
pub trait IntersectionProvider: Send + Sync {
    fn create_observer(
        &self,
        options: ObserverOptions,
        sink: IntersectionSink,
    ) -> Arc<dyn ViewportObserver>;
}

/// Where a provider pushes its reports.
///
/// Clones share the same callback. Providers may call `deliver` from any
/// thread, including re-entrantly from inside `observe`.
#[derive(Clone)]
pub struct IntersectionSink {
    deliver: Arc<dyn Fn(Vec<IntersectionEntry>) + Send + Sync>,
}

impl IntersectionSink {
    pub fn new(deliver: impl Fn(Vec<IntersectionEntry>) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn deliver(&self, entries: Vec<IntersectionEntry>) {
        (self.deliver)(entries);
    }
}

impl fmt::Debug for IntersectionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IntersectionSink")
    }
}

struct ManualObserverState {
    sink: IntersectionSink,
    options: ObserverOptions,
    observed: HashSet<String>,
}

struct ManualState {
    observers_created: usize,
    active: Option<ManualObserverState>,
}

struct ManualShared {
    state: Mutex<ManualState>,
}

/// Hand-driven provider that keeps reports in-memory for tests.
///
/// Tests push entries with [`deliver`](ManualIntersection::deliver); only
/// targets currently observed are forwarded to the sink.
#[derive(Clone)]
pub struct ManualIntersection {
    shared: Arc<ManualShared>,
}

impl ManualIntersection {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ManualShared {
                state: Mutex::new(ManualState {
                    observers_created: 0,
                    active: None,
                }),
            }),
        }
    }

    /// How many observers this provider has handed out
    pub fn observers_created(&self) -> usize {
        self.shared.state.lock().unwrap().observers_created
    }

    /// Ids currently observed by the active subscription, sorted
    pub fn observed_ids(&self) -> Vec<String> {
        let state = self.shared.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .active
            .as_ref()
            .map(|a| a.observed.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn is_observing(&self, id: &str) -> bool {
        let state = self.shared.state.lock().unwrap();
        state
            .active
            .as_ref()
            .map(|a| a.observed.contains(id))
            .unwrap_or(false)
    }

    /// Whether an active (not disconnected) subscription exists
    pub fn has_active_observer(&self) -> bool {
        self.shared.state.lock().unwrap().active.is_some()
    }

    /// Options the active subscription was created with
    pub fn active_options(&self) -> Option<ObserverOptions> {
        let state = self.shared.state.lock().unwrap();
        state.active.as_ref().map(|a| a.options.clone())
    }

    /// Forward `entries` to the sink, dropping targets nobody observes
    pub fn deliver(&self, entries: Vec<IntersectionEntry>) {
        let (sink, entries) = {
            let state = self.shared.state.lock().unwrap();
            let Some(active) = state.active.as_ref() else {
                return;
            };
            let filtered: Vec<IntersectionEntry> = entries
                .into_iter()
                .filter(|e| active.observed.contains(&e.target))
                .collect();
            if filtered.is_empty() {
                return;
            }
            (active.sink.clone(), filtered)
        };
        sink.deliver(entries);
    }

    /// Shorthand for delivering a single report
    pub fn deliver_one(&self, target: &str, ratio: f32) {
        self.deliver(vec![IntersectionEntry::new(target, ratio)]);
    }
}

impl Default for ManualIntersection {
    fn default() -> Self {
        Self::new()
    }
}

impl IntersectionProvider for ManualIntersection {
    fn create_observer(
        &self,
        options: ObserverOptions,
        sink: IntersectionSink,
    ) -> Arc<dyn ViewportObserver> {
        let mut state = self.shared.state.lock().unwrap();
        state.observers_created += 1;
        state.active = Some(ManualObserverState {
            sink,
            options,
            observed: HashSet::new(),
        });
        Arc::new(ManualObserver {
            shared: Arc::downgrade(&self.shared),
        })
    }
}

struct ManualObserver {
    shared: Weak<ManualShared>,
}

impl ViewportObserver for ManualObserver {
    fn observe(&self, target: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().unwrap();
        if let Some(active) = state.active.as_mut() {
            active.observed.insert(target.to_string());
        }
    }

    fn unobserve(&self, target: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock().unwrap();
        if let Some(active) = state.active.as_mut() {
            active.observed.remove(target);
        }
    }

    fn disconnect(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.state.lock().unwrap().active = None;
    }
}
