use std::sync::Arc;
use std::time::Duration;

use viewplay::{
    CoordinatorConfig, IntersectionEntry, ManualIntersection, ManualScheduler,
    PlaybackCoordinator, StubElement,
};

fn harness() -> (PlaybackCoordinator, ManualIntersection, Arc<ManualScheduler>) {
    let provider = ManualIntersection::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let coordinator = PlaybackCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(provider.clone()),
        scheduler.clone(),
    )
    .expect("default config is valid");
    (coordinator, provider, scheduler)
}

#[test]
fn reports_during_cooldown_run_in_a_follow_up_pass() {
    let (coordinator, provider, scheduler) = harness();
    let v = Arc::new(StubElement::new("v"));
    coordinator.register("v", v.clone()).unwrap();
    scheduler.run_frame();

    provider.deliver_one("v", 0.9);
    scheduler.run_frame();
    scheduler.run_tasks();
    assert_eq!(coordinator.stats().passes, 1);

    // Lands inside the cooldown window: no second pass yet
    provider.deliver_one("v", 0.0);
    scheduler.run_frame();
    assert_eq!(coordinator.stats().passes, 1);
    assert_eq!(v.pause_count(), 0);

    // Cooldown elapses, the backlog is picked up at the next frame boundary
    scheduler.advance(Duration::from_millis(50));
    assert_eq!(coordinator.stats().passes, 2);
    assert_eq!(v.pause_count(), 1);
    assert_eq!(coordinator.stats().batches_coalesced, 1);
}

#[test]
fn quiet_cooldown_returns_the_gate_to_idle() {
    let (coordinator, provider, scheduler) = harness();
    let v = Arc::new(StubElement::new("v"));
    coordinator.register("v", v.clone()).unwrap();
    scheduler.run_frame();

    provider.deliver_one("v", 0.9);
    scheduler.run_frame();
    scheduler.advance(Duration::from_millis(60));
    assert_eq!(coordinator.stats().passes, 1);

    // A fresh report after the quiet period schedules a fresh pass
    provider.deliver_one("v", 0.0);
    scheduler.run_frame();
    assert_eq!(coordinator.stats().passes, 2);
}

#[test]
fn cooldown_duration_comes_from_config() {
    let provider = ManualIntersection::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let config = CoordinatorConfig {
        cooldown_ms: 200,
        ..CoordinatorConfig::default()
    };
    let coordinator = PlaybackCoordinator::new(
        config,
        Arc::new(provider.clone()),
        scheduler.clone(),
    )
    .unwrap();
    let v = Arc::new(StubElement::new("v"));
    coordinator.register("v", v).unwrap();
    scheduler.run_frame();

    provider.deliver_one("v", 0.9);
    scheduler.run_frame();
    provider.deliver_one("v", 0.0);

    // Well past the default cooldown but inside the configured one
    scheduler.advance(Duration::from_millis(150));
    assert_eq!(coordinator.stats().passes, 1);

    scheduler.advance(Duration::from_millis(100));
    assert_eq!(coordinator.stats().passes, 2);
}

#[test]
fn cleanup_pauses_everything_and_drops_the_subscription() {
    let (coordinator, provider, scheduler) = harness();
    let v1 = Arc::new(StubElement::new("v1"));
    let v2 = Arc::new(StubElement::new("v2"));
    coordinator.register("v1", v1.clone()).unwrap();
    coordinator.register("v2", v2.clone()).unwrap();
    scheduler.run_frame();

    provider.deliver_one("v1", 0.9);
    scheduler.run_frame();
    scheduler.run_tasks();
    assert!(coordinator.is_marked_playing("v1"));

    coordinator.cleanup();
    assert!(coordinator.registered_ids().is_empty());
    assert!(!provider.has_active_observer());
    assert_eq!(v1.pause_count(), 1);
    assert_eq!(v2.pause_count(), 1);

    // Idempotent: nothing left to pause or disconnect
    coordinator.cleanup();
    assert_eq!(v1.pause_count(), 1);
    assert_eq!(v2.pause_count(), 1);
}

#[test]
fn cleanup_cancels_scheduled_passes() {
    let (coordinator, provider, scheduler) = harness();
    let v = Arc::new(StubElement::new("v"));
    coordinator.register("v", v.clone()).unwrap();
    scheduler.run_frame();

    provider.deliver_one("v", 0.9);
    coordinator.cleanup();

    // The pass callback still fires, but it belongs to the old lifetime
    scheduler.run_frame();
    scheduler.run_tasks();
    assert_eq!(coordinator.stats().passes, 0);
    assert_eq!(v.play_count(), 0);
}

#[test]
fn coordinator_revives_cleanly_after_cleanup() {
    let (coordinator, provider, scheduler) = harness();
    let v = Arc::new(StubElement::new("v"));
    coordinator.register("v", v).unwrap();
    scheduler.run_frame();
    assert_eq!(provider.observers_created(), 1);

    coordinator.cleanup();

    let w = Arc::new(StubElement::new("w"));
    coordinator.register("w", w.clone()).unwrap();
    scheduler.run_frame();

    // A fresh subscription backs the revived coordinator
    assert_eq!(provider.observers_created(), 2);
    assert!(provider.is_observing("w"));

    provider.deliver_one("w", 0.9);
    scheduler.run_frame();
    scheduler.run_tasks();
    assert_eq!(w.play_count(), 1);
    assert!(coordinator.is_marked_playing("w"));
}

#[test]
fn unregister_before_the_attach_frame_leaves_no_subscription() {
    let (coordinator, provider, scheduler) = harness();
    let v = Arc::new(StubElement::new("v"));
    coordinator.register("v", v.clone()).unwrap();

    // Gone before the deferred attach ever runs
    coordinator.unregister("v");
    scheduler.run_frame();

    assert!(!provider.is_observing("v"));
    assert_eq!(provider.observers_created(), 0, "no handle ever attached");
    assert_eq!(v.pause_count(), 1);
}

#[test]
fn reports_for_unknown_targets_are_ignored() {
    let (coordinator, provider, scheduler) = harness();
    let v = Arc::new(StubElement::new("v"));
    coordinator.register("v", v).unwrap();
    scheduler.run_frame();

    // Unregister drops the observation along with the handle, so a stale
    // report for the old id never reaches the coordinator and schedules
    // nothing.
    coordinator.unregister("v");
    provider.deliver(vec![IntersectionEntry::new("v", 0.9)]);
    scheduler.run_frame();
    scheduler.run_tasks();
    assert_eq!(coordinator.stats().passes, 0);
}

#[test]
fn stats_track_registration_churn() {
    let (coordinator, _provider, scheduler) = harness();
    for i in 0..4 {
        let id = format!("v{}", i);
        coordinator
            .register(id.clone(), Arc::new(StubElement::new(id)))
            .unwrap();
    }
    coordinator.unregister("v0");
    coordinator.unregister("v0");
    scheduler.run_frame();

    let stats = coordinator.stats();
    assert_eq!(stats.registered, 3);
    assert_eq!(stats.passes, 0);
    assert_eq!(stats.plays_issued, 0);
}
