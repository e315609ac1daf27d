//! Viewport-driven play/pause decisions over registered media elements.
//!
//! One coordinator owns one visibility subscription and one handle map.
//! Visibility reports are coalesced per frame into a single decision pass:
//! fully hidden handles pause first, sufficiently visible ones start playing,
//! and everything in between keeps its current state so edge flicker never
//! produces a play/pause storm.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, join_all};
use log::{debug, trace};

use crate::element::{MediaElement, PlayOutcome};
use crate::error::{Error, Result};
use crate::intersection::{
    IntersectionEntry, IntersectionProvider, IntersectionSink, ViewportObserver,
};
use crate::scheduler::Scheduler;
use crate::{CoordinatorConfig, StartPolicy};

/// Collapses report bursts: one pass may be scheduled at a time, and the gate
/// stays closed through a short cooldown after the pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassGate {
    Idle,
    Scheduled,
    Cooldown,
}

struct Handle {
    element: Arc<dyn MediaElement>,
    /// Distinguishes re-registrations under the same id
    instance: u64,
    /// Bumped per play decision; settlements must present a matching value
    attempt: u64,
    /// A play request is in flight
    play_pending: bool,
    /// The last play request settled successfully
    playing: bool,
    /// Handle was above the visible threshold at its last decision
    was_visible: bool,
}

/// Counters describing coordinator activity, for tests and debugging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Handles currently registered
    pub registered: usize,
    /// Decision passes executed
    pub passes: u64,
    /// Report batches absorbed into an already scheduled or cooling pass
    pub batches_coalesced: u64,
    /// Play requests issued
    pub plays_issued: u64,
    /// Play requests that settled declined
    pub plays_declined: u64,
    /// Pause calls issued by decision passes
    pub pauses_issued: u64,
}

struct CoordinatorState {
    handles: HashMap<String, Handle>,
    /// Latest reported ratio per handle since the last pass consumed them
    pending: HashMap<String, f32>,
    gate: PassGate,
    observer: Option<Arc<dyn ViewportObserver>>,
    /// Bumped by `cleanup`; scheduled callbacks from before the bump are stale
    epoch: u64,
    next_instance: u64,
    passes: u64,
    batches_coalesced: u64,
    plays_issued: u64,
    plays_declined: u64,
    pauses_issued: u64,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    provider: Arc<dyn IntersectionProvider>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<CoordinatorState>,
}

struct PlayPlan {
    id: String,
    element: Arc<dyn MediaElement>,
    instance: u64,
    attempt: u64,
    fresh: bool,
}

/// Decides which registered media elements play based on their viewport
/// visibility.
///
/// Construct one per page or composition root and share clones with whatever
/// mounts media. Registration is cheap; the observer subscription is created
/// lazily on the first attach and shared by every handle.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PlaybackCoordinator {
    /// Build a coordinator over the given platform seams.
    ///
    /// Fails when `config` does not validate.
    pub fn new(
        config: CoordinatorConfig,
        provider: Arc<dyn IntersectionProvider>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                provider,
                scheduler,
                state: Mutex::new(CoordinatorState {
                    handles: HashMap::new(),
                    pending: HashMap::new(),
                    gate: PassGate::Idle,
                    observer: None,
                    epoch: 0,
                    next_instance: 0,
                    passes: 0,
                    batches_coalesced: 0,
                    plays_issued: 0,
                    plays_declined: 0,
                    pauses_issued: 0,
                }),
            }),
        })
    }

    /// Track `element` under `id` and start watching its visibility on the
    /// next frame, once the caller's layout has committed.
    ///
    /// Registering an id that is already live first unregisters the stale
    /// entry: the old element is paused, its observation dropped, and any
    /// in-flight play attempt abandoned. Playback never starts from here;
    /// it starts when observed visibility crosses the configured threshold.
    pub fn register(&self, id: impl Into<String>, element: Arc<dyn MediaElement>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidHandle("handle id must be non-empty".into()));
        }

        let (stale, instance, epoch) = {
            let mut state = self.inner.state.lock().unwrap();
            state.pending.remove(&id);
            let stale = state.handles.remove(&id).map(|old| {
                debug!("register: replacing live handle {:?}", id);
                (old.element, state.observer.clone())
            });
            state.next_instance += 1;
            let instance = state.next_instance;
            state.handles.insert(
                id.clone(),
                Handle {
                    element,
                    instance,
                    attempt: 0,
                    play_pending: false,
                    playing: false,
                    was_visible: false,
                },
            );
            (stale, instance, state.epoch)
        };

        if let Some((element, observer)) = stale {
            element.pause();
            if let Some(observer) = observer {
                observer.unobserve(&id);
            }
        }

        trace!("register: {:?} (instance {})", id, instance);
        let weak = Arc::downgrade(&self.inner);
        let attach_id = id;
        self.inner.scheduler.schedule_frame(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                CoordinatorInner::attach(&inner, &attach_id, instance, epoch);
            }
        }));
        Ok(())
    }

    /// Stop tracking `id`: pause its element, drop its observation, and
    /// abandon any in-flight play attempt. Unknown ids are a no-op.
    ///
    /// Synchronous; the element is paused before this returns.
    pub fn unregister(&self, id: &str) {
        let removed = {
            let mut state = self.inner.state.lock().unwrap();
            state.pending.remove(id);
            state
                .handles
                .remove(id)
                .map(|handle| (handle.element, state.observer.clone()))
        };
        let Some((element, observer)) = removed else {
            return;
        };
        trace!("unregister: {:?}", id);
        element.pause();
        if let Some(observer) = observer {
            observer.unobserve(id);
        }
    }

    /// Unregister everything and tear down the shared subscription.
    ///
    /// Idempotent. The coordinator stays usable: the next `register` lazily
    /// creates a fresh subscription.
    pub fn cleanup(&self) {
        let (handles, observer) = {
            let mut state = self.inner.state.lock().unwrap();
            state.epoch += 1;
            state.gate = PassGate::Idle;
            state.pending.clear();
            (std::mem::take(&mut state.handles), state.observer.take())
        };
        if !handles.is_empty() || observer.is_some() {
            debug!("cleanup: dropping {} handle(s)", handles.len());
        }
        let mut handles: Vec<(String, Handle)> = handles.into_iter().collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, handle) in handles {
            handle.element.pause();
        }
        if let Some(observer) = observer {
            observer.disconnect();
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.state.lock().unwrap().handles.contains_key(id)
    }

    /// Currently registered ids, sorted
    pub fn registered_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        let mut ids: Vec<String> = state.handles.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether the coordinator's last play attempt for `id` settled
    /// successfully. The element itself remains the source of truth for
    /// actual playback state.
    pub fn is_marked_playing(&self, id: &str) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.handles.get(id).map(|h| h.playing).unwrap_or(false)
    }

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.inner.state.lock().unwrap();
        CoordinatorStats {
            registered: state.handles.len(),
            passes: state.passes,
            batches_coalesced: state.batches_coalesced,
            plays_issued: state.plays_issued,
            plays_declined: state.plays_declined,
            pauses_issued: state.pauses_issued,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }
}

impl CoordinatorInner {
    /// Sink handed to the provider. Holds a weak reference so reports after
    /// teardown fall through harmlessly.
    fn sink(inner: &Arc<Self>) -> IntersectionSink {
        let weak = Arc::downgrade(inner);
        IntersectionSink::new(move |entries| {
            if let Some(inner) = weak.upgrade() {
                Self::deliver(&inner, entries);
            }
        })
    }

    /// Deferred half of `register`: subscribe the handle to visibility
    /// reports, creating the shared observer on first use.
    fn attach(inner: &Arc<Self>, id: &str, instance: u64, epoch: u64) {
        let existing = {
            let state = inner.state.lock().unwrap();
            if state.epoch != epoch || !Self::handle_live(&state, id, instance) {
                return;
            }
            state.observer.clone()
        };

        let observer = match existing {
            Some(observer) => observer,
            None => {
                // Created outside the lock: providers may report synchronously
                // from inside create_observer or observe.
                let created = inner
                    .provider
                    .create_observer(inner.config.observer_options(), Self::sink(inner));
                let race_loser = {
                    let mut state = inner.state.lock().unwrap();
                    if state.epoch != epoch {
                        Some(created.clone())
                    } else {
                        match &state.observer {
                            Some(existing) => Some(existing.clone()),
                            None => {
                                state.observer = Some(created.clone());
                                None
                            }
                        }
                    }
                };
                match race_loser {
                    // Torn down while creating
                    Some(winner) if Arc::ptr_eq(&winner, &created) => {
                        created.disconnect();
                        return;
                    }
                    // Another attach installed its observer first
                    Some(winner) => {
                        created.disconnect();
                        winner
                    }
                    None => created,
                }
            }
        };

        observer.observe(id);

        // The handle may have been unregistered while we subscribed; that
        // unregister saw no observation to drop, so drop it here.
        let gone = {
            let state = inner.state.lock().unwrap();
            !Self::handle_live(&state, id, instance)
        };
        if gone {
            observer.unobserve(id);
        }
    }

    fn handle_live(state: &CoordinatorState, id: &str, instance: u64) -> bool {
        state
            .handles
            .get(id)
            .map(|h| h.instance == instance)
            .unwrap_or(false)
    }

    /// Entry point for visibility reports. Records the latest ratio per
    /// handle and schedules a decision pass unless one is already pending.
    fn deliver(inner: &Arc<Self>, entries: Vec<IntersectionEntry>) {
        if entries.is_empty() {
            return;
        }
        let schedule_epoch = {
            let mut state = inner.state.lock().unwrap();
            let mut recorded = false;
            for entry in entries {
                if state.handles.contains_key(&entry.target) {
                    state.pending.insert(entry.target, entry.ratio);
                    recorded = true;
                }
            }
            if !recorded {
                None
            } else {
                match state.gate {
                    PassGate::Idle => {
                        state.gate = PassGate::Scheduled;
                        Some(state.epoch)
                    }
                    PassGate::Scheduled | PassGate::Cooldown => {
                        state.batches_coalesced += 1;
                        None
                    }
                }
            }
        };
        if let Some(epoch) = schedule_epoch {
            Self::schedule_pass(inner, epoch);
        }
    }

    fn schedule_pass(inner: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(inner);
        inner.scheduler.schedule_frame(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self::run_pass(&inner, epoch);
            }
        }));
    }

    /// One decision pass: consume the pending ratios, pause everything fully
    /// hidden, then start everything sufficiently visible. Intermediate
    /// ratios leave their handle untouched.
    fn run_pass(inner: &Arc<Self>, epoch: u64) {
        let mut pauses: Vec<(String, Arc<dyn MediaElement>)> = Vec::new();
        let mut plays: Vec<PlayPlan> = Vec::new();
        {
            let mut state = inner.state.lock().unwrap();
            if state.epoch != epoch {
                return;
            }
            state.gate = PassGate::Cooldown;
            state.passes += 1;
            let pending = std::mem::take(&mut state.pending);
            let visible = inner.config.visible_threshold;
            for (id, ratio) in pending {
                let Some(handle) = state.handles.get_mut(&id) else {
                    continue;
                };
                if ratio <= 0.0 {
                    handle.play_pending = false;
                    handle.playing = false;
                    handle.was_visible = false;
                    pauses.push((id, handle.element.clone()));
                } else if ratio > visible {
                    if handle.playing || handle.play_pending {
                        handle.was_visible = true;
                        continue;
                    }
                    let fresh = !handle.was_visible;
                    handle.was_visible = true;
                    handle.play_pending = true;
                    handle.attempt += 1;
                    plays.push(PlayPlan {
                        id,
                        element: handle.element.clone(),
                        instance: handle.instance,
                        attempt: handle.attempt,
                        fresh,
                    });
                }
            }
            state.pauses_issued += pauses.len() as u64;
        }

        // Stable order keeps traces reproducible; callers get no ordering
        // guarantee between handles.
        pauses.sort_by(|a, b| a.0.cmp(&b.0));
        plays.sort_by(|a, b| a.id.cmp(&b.id));

        // Pauses strictly precede plays so decode resources are released
        // before new playback claims them.
        for (id, element) in &pauses {
            trace!("pass: pause {:?}", id);
            element.pause();
        }

        if !plays.is_empty() {
            // Handles unregistered since partition no longer want their play.
            let plays: Vec<PlayPlan> = {
                let mut state = inner.state.lock().unwrap();
                let plays: Vec<PlayPlan> = plays
                    .into_iter()
                    .filter(|plan| Self::handle_live(&state, &plan.id, plan.instance))
                    .collect();
                state.plays_issued += plays.len() as u64;
                plays
            };
            Self::issue_plays(inner, plays);
        }

        let weak = Arc::downgrade(inner);
        inner
            .scheduler
            .schedule_after(inner.config.cooldown(), Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::release_gate(&inner, epoch);
                }
            }));
    }

    /// Fire every play request, then await them together in one spawned task.
    /// Requests never serialize behind each other's settlement.
    fn issue_plays(inner: &Arc<Self>, plans: Vec<PlayPlan>) {
        if plans.is_empty() {
            return;
        }
        let mut settlements: Vec<(String, u64, u64, BoxFuture<'static, PlayOutcome>)> =
            Vec::with_capacity(plans.len());
        for plan in plans {
            trace!("pass: play {:?} (fresh: {})", plan.id, plan.fresh);
            if plan.fresh
                && inner.config.start_policy == StartPolicy::Restart
                && plan.element.is_ready()
            {
                plan.element.seek_to_start();
            }
            if inner.config.mute_for_autoplay {
                plan.element.set_muted(true);
                plan.element.set_inline(true);
            }
            let future = plan.element.play();
            settlements.push((plan.id, plan.instance, plan.attempt, future));
        }

        let weak = Arc::downgrade(inner);
        inner.scheduler.spawn(Box::pin(async move {
            let outcomes = join_all(settlements.into_iter().map(
                |(id, instance, attempt, future)| async move {
                    (id, instance, attempt, future.await)
                },
            ))
            .await;
            if let Some(inner) = weak.upgrade() {
                Self::settle(&inner, outcomes);
            }
        }));
    }

    /// Apply play settlements, ignoring any that no longer match the live
    /// handle and attempt they were issued for.
    fn settle(inner: &Arc<Self>, outcomes: Vec<(String, u64, u64, PlayOutcome)>) {
        let mut declined = 0u64;
        let mut state = inner.state.lock().unwrap();
        for (id, instance, attempt, outcome) in outcomes {
            let Some(handle) = state.handles.get_mut(&id) else {
                trace!("settle: {:?} no longer registered", id);
                continue;
            };
            if handle.instance != instance || handle.attempt != attempt || !handle.play_pending {
                trace!("settle: {:?} attempt superseded", id);
                continue;
            }
            handle.play_pending = false;
            match outcome {
                Ok(()) => {
                    handle.playing = true;
                    trace!("settle: {:?} playing", id);
                }
                Err(reason) => {
                    // Expected under autoplay policy; the handle just stays
                    // paused.
                    declined += 1;
                    debug!("settle: {:?} declined: {}", id, reason);
                }
            }
        }
        state.plays_declined += declined;
    }

    /// End of the post-pass cooldown. Reports that arrived during the pass or
    /// cooldown schedule a follow-up pass immediately.
    fn release_gate(inner: &Arc<Self>, epoch: u64) {
        let reschedule = {
            let mut state = inner.state.lock().unwrap();
            if state.epoch != epoch || state.gate != PassGate::Cooldown {
                return;
            }
            if state.pending.is_empty() {
                state.gate = PassGate::Idle;
                false
            } else {
                state.gate = PassGate::Scheduled;
                true
            }
        };
        if reschedule {
            Self::schedule_pass(inner, epoch);
        }
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        // Last owner gone without cleanup(); leave no element playing and no
        // subscription behind.
        if let Ok(state) = self.state.get_mut() {
            for (_, handle) in state.handles.drain() {
                handle.element.pause();
            }
            if let Some(observer) = state.observer.take() {
                observer.disconnect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StubElement;
    use crate::intersection::ManualIntersection;
    use crate::scheduler::ManualScheduler;

    fn coordinator() -> (PlaybackCoordinator, ManualIntersection, Arc<ManualScheduler>) {
        let provider = ManualIntersection::new();
        let scheduler = Arc::new(ManualScheduler::new());
        let coordinator = PlaybackCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(provider.clone()),
            scheduler.clone(),
        )
        .unwrap();
        (coordinator, provider, scheduler)
    }

    #[test]
    fn empty_id_is_rejected() {
        let (coordinator, _, _) = coordinator();
        let err = coordinator
            .register("", Arc::new(StubElement::new("v")))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let provider = ManualIntersection::new();
        let scheduler = Arc::new(ManualScheduler::new());
        let config = CoordinatorConfig {
            visible_threshold: 1.5,
            ..CoordinatorConfig::default()
        };
        let result = PlaybackCoordinator::new(config, Arc::new(provider), scheduler);
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn registration_is_tracked_and_observed_after_a_frame() {
        let (coordinator, provider, scheduler) = coordinator();
        coordinator
            .register("v1", Arc::new(StubElement::new("v1")))
            .unwrap();
        assert!(coordinator.is_registered("v1"));
        // Observation waits for the caller's layout to commit
        assert!(!provider.is_observing("v1"));
        scheduler.run_frame();
        assert!(provider.is_observing("v1"));
        assert_eq!(coordinator.registered_ids(), vec!["v1".to_string()]);
    }

    #[test]
    fn unregister_detaches_and_pauses() {
        let (coordinator, provider, scheduler) = coordinator();
        let element = Arc::new(StubElement::new("v1"));
        coordinator.register("v1", element.clone()).unwrap();
        scheduler.run_frame();

        coordinator.unregister("v1");
        assert!(!coordinator.is_registered("v1"));
        assert!(!provider.is_observing("v1"));
        assert_eq!(element.pause_count(), 1);

        // Unknown and repeated ids are no-ops
        coordinator.unregister("v1");
        coordinator.unregister("never-registered");
        assert_eq!(element.pause_count(), 1);
    }

    #[test]
    fn drop_without_cleanup_pauses_and_disconnects() {
        let (coordinator, provider, scheduler) = coordinator();
        let element = Arc::new(StubElement::new("v1"));
        coordinator.register("v1", element.clone()).unwrap();
        scheduler.run_frame();
        assert!(provider.has_active_observer());

        drop(coordinator);
        assert_eq!(element.pause_count(), 1);
        assert!(!provider.has_active_observer());
    }
}
