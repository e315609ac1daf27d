use std::sync::Arc;
use std::time::Duration;

use viewplay::{
    CoordinatorConfig, GeometryTracker, MediaElement, PlaybackCoordinator, Rect, StubElement,
    TokioScheduler,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let tracker = GeometryTracker::new(800.0, 600.0);
    let scheduler = Arc::new(TokioScheduler::new());
    let coordinator = PlaybackCoordinator::new(
        CoordinatorConfig::default(),
        Arc::new(tracker.clone()),
        scheduler,
    )?;

    // A vertical feed of clips, one every 700px
    let mut clips = Vec::new();
    for i in 0..6 {
        let id = format!("clip{}", i);
        let element = Arc::new(StubElement::new(id.clone()));
        tracker.set_target_bounds(id.clone(), Rect::new(0.0, i as f32 * 700.0, 800.0, 400.0));
        coordinator.register(id.clone(), element.clone())?;
        clips.push((id, element));
    }

    // Let the deferred observation attach before scrolling
    tokio::time::sleep(Duration::from_millis(50)).await;

    for step in 0..12u32 {
        tracker.scroll_to(0.0, step as f32 * 350.0);
        // Leave room for the frame-aligned pass and its cooldown
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    for (id, element) in &clips {
        println!(
            "{}: plays={} pauses={} paused={}",
            id,
            element.play_count(),
            element.pause_count(),
            element.is_paused()
        );
    }
    let stats = coordinator.stats();
    println!(
        "passes={} coalesced={} plays={} declined={} pauses={}",
        stats.passes,
        stats.batches_coalesced,
        stats.plays_issued,
        stats.plays_declined,
        stats.pauses_issued
    );

    coordinator.cleanup();
    Ok(())
}
