use std::sync::Arc;
use std::time::Duration;

use criterion::Criterion;

use viewplay::{
    CoordinatorConfig, GeometryTracker, IntersectionEntry, IntersectionSink, ManualIntersection,
    ManualScheduler, ObserverOptions, IntersectionProvider, PlaybackCoordinator, Rect,
    StubElement,
};

// Consolidated benchmark suite for viewplay. Run with:
//    cargo bench

const HANDLES: usize = 50;

fn wired_coordinator(
    handles: usize,
) -> (PlaybackCoordinator, ManualIntersection, Arc<ManualScheduler>) {
    let provider = ManualIntersection::new();
    let scheduler = Arc::new(ManualScheduler::new());
    let coordinator = PlaybackCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(provider.clone()),
        scheduler.clone(),
    )
    .expect("default config is valid");
    for i in 0..handles {
        let id = format!("v{}", i);
        coordinator
            .register(id.clone(), Arc::new(StubElement::new(id)))
            .expect("register");
    }
    scheduler.run_frame();
    (coordinator, provider, scheduler)
}

/// Bench: one full decision pass flipping every handle between play and pause
fn bench_decision_pass(c: &mut Criterion) {
    let (_coordinator, provider, scheduler) = wired_coordinator(HANDLES);
    let mut flip = false;

    c.bench_function("decision_pass_50_handles", |b| {
        b.iter(|| {
            flip = !flip;
            let entries: Vec<IntersectionEntry> = (0..HANDLES)
                .map(|i| {
                    let visible = (i % 2 == 0) == flip;
                    IntersectionEntry::new(format!("v{}", i), if visible { 0.9 } else { 0.0 })
                })
                .collect();
            provider.deliver(entries);
            scheduler.run_frame();
            scheduler.advance(Duration::from_millis(50));
            scheduler.run_tasks();
        })
    });
}

/// Bench: 50 report batches coalescing into a single pass
fn bench_burst_coalescing(c: &mut Criterion) {
    let (_coordinator, provider, scheduler) = wired_coordinator(1);

    c.bench_function("burst_coalesce_50_batches", |b| {
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            for i in 0..50 {
                let ratio = if (i % 2 == 0) == flip { 0.9 } else { 0.0 };
                provider.deliver_one("v0", ratio);
            }
            scheduler.run_frame();
            scheduler.advance(Duration::from_millis(50));
            scheduler.run_tasks();
        })
    });
}

/// Bench: geometry recompute across a long scroll document
fn bench_geometry_refresh(c: &mut Criterion) {
    let tracker = GeometryTracker::new(800.0, 600.0);
    for i in 0..200 {
        tracker.set_target_bounds(format!("v{}", i), Rect::new(0.0, i as f32 * 500.0, 800.0, 400.0));
    }
    let sink = IntersectionSink::new(|_| {});
    let observer = tracker.create_observer(ObserverOptions::default(), sink);
    for i in 0..200 {
        observer.observe(&format!("v{}", i));
    }
    let mut offset = 0.0f32;

    c.bench_function("geometry_refresh_200_targets", |b| {
        b.iter(|| {
            offset = if offset > 90_000.0 { 0.0 } else { offset + 700.0 };
            tracker.scroll_to(0.0, offset);
        })
    });
}

fn main() {
    let mut c = Criterion::default();

    bench_decision_pass(&mut c);
    bench_burst_coalescing(&mut c);
    bench_geometry_refresh(&mut c);

    c.final_summary();
}
