//! Viewplay
//!
//! Viewport-driven media playback coordination: register media elements,
//! feed the coordinator visibility reports, and it decides which elements
//! play or pause. Decisions are batched per frame so scroll-driven report
//! storms collapse into single passes instead of a play/pause storm.
//!
//! - **Batched decisions**: report bursts coalesce into one pass per frame,
//!   with a short cooldown between passes.
//! - **Hysteresis**: a handle pauses only when fully hidden and starts only
//!   above the visible threshold; ratios in between change nothing.
//! - **Swappable platform**: visibility and scheduling sit behind traits,
//!   with in-memory implementations for deterministic tests.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use viewplay::{
//!     CoordinatorConfig, ManualIntersection, ManualScheduler, PlaybackCoordinator, StubElement,
//! };
//!
//! # fn main() -> viewplay::Result<()> {
//! let viewport = ManualIntersection::new();
//! let clock = Arc::new(ManualScheduler::new());
//! let coordinator = PlaybackCoordinator::new(
//!     CoordinatorConfig::default(),
//!     Arc::new(viewport.clone()),
//!     clock.clone(),
//! )?;
//!
//! let video = Arc::new(StubElement::new("hero"));
//! coordinator.register("hero", video.clone())?;
//! clock.run_frame(); // observation attaches one frame after registration
//!
//! viewport.deliver_one("hero", 0.6); // more than half visible
//! clock.run_frame(); // the decision pass runs at the frame boundary
//! assert_eq!(video.play_count(), 1);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

// Play/pause decision engine
pub mod coordinator;

// Media element capability surface and the in-memory stub
pub mod element;

// Visibility observation contracts and the hand-driven test provider
pub mod intersection;

// Document-space geometry and the scrollable reference provider
pub mod geometry;

// Frame/timer seam: Tokio-backed and virtual-clock schedulers
pub mod scheduler;

// Scripted scroll timelines producing deterministic decision traces
pub mod simulate;

pub use coordinator::{CoordinatorStats, PlaybackCoordinator};
pub use element::{CallJournal, ElementCall, MediaElement, PlayMode, PlayOutcome, PlaybackDeclined, StubElement};
pub use geometry::{GeometryTracker, Margin, Rect};
pub use intersection::{
    IntersectionEntry, IntersectionProvider, IntersectionSink, ManualIntersection,
    ObserverOptions, ViewportObserver,
};
pub use scheduler::{ManualScheduler, Scheduler, TokioScheduler, DEFAULT_FRAME_INTERVAL};

/// What a fresh entry into view does to the playback position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Rewind to the beginning before playing. The common choice for
    /// ambient gallery video.
    Restart,
    /// Continue from wherever playback last stopped
    Resume,
}

/// Configuration for the playback coordinator
///
/// The defaults mirror how gallery autoplay is usually tuned: a generous
/// preload margin so playback can warm up slightly before the element is
/// strictly visible, a low visible threshold, and a short cooldown between
/// decision passes.
///
/// # Examples
///
/// ```
/// let config = viewplay::CoordinatorConfig::default();
/// assert_eq!(config.visible_threshold, 0.1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Coverage ratios the visibility subscription reports crossings at
    pub thresholds: Vec<f32>,
    /// Coverage strictly above this plays; exactly zero pauses; anything in
    /// between keeps its current state
    pub visible_threshold: f32,
    /// Viewport expansion applied before intersection tests, in pixels
    pub margin: Margin,
    /// How long the pass gate stays closed after a decision pass
    pub cooldown_ms: u64,
    /// Position handling when a handle freshly enters view
    pub start_policy: StartPolicy,
    /// Mute and mark elements inline before requesting play, so mobile
    /// autoplay policies permit unprompted starts
    pub mute_for_autoplay: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![0.0, 0.1, 0.5],
            visible_threshold: 0.1,
            margin: Margin::uniform(100.0),
            cooldown_ms: 50,
            start_policy: StartPolicy::Restart,
            mute_for_autoplay: true,
        }
    }
}

impl CoordinatorConfig {
    /// Check the tunables are coherent
    pub fn validate(&self) -> Result<()> {
        if self.thresholds.is_empty() {
            return Err(Error::ConfigError(
                "at least one visibility threshold is required".into(),
            ));
        }
        for &t in &self.thresholds {
            if !t.is_finite() || !(0.0..=1.0).contains(&t) {
                return Err(Error::ConfigError(format!(
                    "visibility threshold {} outside [0, 1]",
                    t
                )));
            }
        }
        if !self.visible_threshold.is_finite() || !(0.0..1.0).contains(&self.visible_threshold) {
            return Err(Error::ConfigError(format!(
                "visible threshold {} outside [0, 1)",
                self.visible_threshold
            )));
        }
        let m = &self.margin;
        if ![m.top, m.right, m.bottom, m.left].iter().all(|v| v.is_finite()) {
            return Err(Error::ConfigError("margin must be finite".into()));
        }
        Ok(())
    }

    /// Subscription options derived from this configuration.
    ///
    /// The decision boundaries (zero and the visible threshold) are always
    /// included so the subscription can actually report them.
    pub fn observer_options(&self) -> ObserverOptions {
        let mut thresholds = self.thresholds.clone();
        for required in [0.0, self.visible_threshold] {
            if !thresholds.iter().any(|&t| t == required) {
                thresholds.push(required);
            }
        }
        thresholds.sort_by(|a, b| a.total_cmp(b));
        ObserverOptions {
            thresholds,
            margin: self.margin,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}
