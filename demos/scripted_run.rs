use viewplay::simulate::{MediaDescriptor, ScrollScript, ScrollStep, Simulation};
use viewplay::CoordinatorConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Two clips in a vertical feed; the second one refuses autoplay
    let script = ScrollScript {
        viewport_width: 800.0,
        viewport_height: 600.0,
        items: vec![
            MediaDescriptor {
                id: "hero".into(),
                src: "https://cdn.example.com/hero.mp4".into(),
                top: 0.0,
                height: 500.0,
                declines: false,
            },
            MediaDescriptor {
                id: "teaser".into(),
                src: "https://cdn.example.com/teaser.mp4".into(),
                top: 1200.0,
                height: 500.0,
                declines: true,
            },
        ],
        steps: vec![
            ScrollStep {
                at_ms: 100,
                scroll_to: 600.0,
            },
            ScrollStep {
                at_ms: 250,
                scroll_to: 1100.0,
            },
        ],
        settle_ms: 200,
    };

    let trace = Simulation::new(script, CoordinatorConfig::default())?.run();
    print!("{}", trace.render());
    println!("digest: {}", trace.digest());
    Ok(())
}
