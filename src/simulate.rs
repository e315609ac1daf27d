//! Scripted scroll timelines producing deterministic decision traces.
//!
//! A [`ScrollScript`] lays out media items in a document, scrolls the
//! viewport at scripted times, and records every call the coordinator makes
//! against the stubbed elements. The resulting [`DecisionTrace`] renders to a
//! stable text form whose SHA-256 digest pins coordinator behavior in golden
//! tests and the CLI.
//!
//! Script format:
//!
//! ```json
//! {
//!   "viewport_width": 800.0,
//!   "viewport_height": 600.0,
//!   "items": [
//!     {"id": "v1", "src": "https://cdn.example.com/v1.mp4", "top": 0.0, "height": 400.0}
//!   ],
//!   "steps": [
//!     {"at_ms": 100, "scroll_to": 300.0}
//!   ],
//!   "settle_ms": 200
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::coordinator::{CoordinatorStats, PlaybackCoordinator};
use crate::element::{CallJournal, ElementCall, PlayMode, PlaybackDeclined, StubElement};
use crate::error::{Error, Result};
use crate::geometry::{GeometryTracker, Rect};
use crate::scheduler::ManualScheduler;
use crate::CoordinatorConfig;

fn default_viewport_width() -> f32 {
    800.0
}

fn default_viewport_height() -> f32 {
    600.0
}

fn default_settle_ms() -> u64 {
    200
}

/// One media item placed in the scripted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Handle id, unique within the script
    pub id: String,
    /// Resolved playable resource location; must be a valid URL
    pub src: String,
    /// Document-space top edge in pixels
    pub top: f32,
    /// Item height in pixels; items span the full viewport width
    pub height: f32,
    /// Settle this item's play requests as declined, modelling an autoplay
    /// policy block
    #[serde(default)]
    pub declines: bool,
}

/// One timed scroll movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScrollStep {
    /// Virtual time at which the viewport moves
    pub at_ms: u64,
    /// New vertical scroll offset in pixels
    pub scroll_to: f32,
}

/// A full scripted run: document layout plus a scroll timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollScript {
    #[serde(default = "default_viewport_width")]
    pub viewport_width: f32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f32,
    pub items: Vec<MediaDescriptor>,
    #[serde(default)]
    pub steps: Vec<ScrollStep>,
    /// Extra virtual time after the last step so trailing passes and
    /// settlements complete
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl ScrollScript {
    /// Parse and validate a script from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let script: ScrollScript =
            serde_json::from_str(json).map_err(|e| Error::ScriptError(e.to_string()))?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.viewport_width > 0.0 && self.viewport_width.is_finite())
            || !(self.viewport_height > 0.0 && self.viewport_height.is_finite())
        {
            return Err(Error::ScriptError("viewport must have positive size".into()));
        }
        let mut seen = HashSet::new();
        for item in &self.items {
            if item.id.is_empty() {
                return Err(Error::ScriptError("item id must be non-empty".into()));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(Error::ScriptError(format!("duplicate item id {:?}", item.id)));
            }
            Url::parse(&item.src)
                .map_err(|e| Error::ScriptError(format!("item {:?} src: {}", item.id, e)))?;
            if !item.top.is_finite() || !item.height.is_finite() || item.height <= 0.0 {
                return Err(Error::ScriptError(format!(
                    "item {:?} must have finite placement and positive height",
                    item.id
                )));
            }
        }
        let ordered = self.steps.windows(2).all(|w| w[0].at_ms <= w[1].at_ms);
        if !ordered {
            return Err(Error::ScriptError("steps must be ordered by at_ms".into()));
        }
        Ok(())
    }
}

/// Everything observable about one scripted run
#[derive(Debug, Clone)]
pub struct DecisionTrace {
    /// Element calls in issue order, one rendered line each
    pub lines: Vec<String>,
    pub stats: CoordinatorStats,
}

impl DecisionTrace {
    /// Stable text form of the trace
    pub fn render(&self) -> String {
        let mut out = String::from("# viewplay decision trace\n");
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        let s = &self.stats;
        out.push_str(&format!(
            "# passes={} coalesced={} plays={} declined={} pauses={} registered={}\n",
            s.passes, s.batches_coalesced, s.plays_issued, s.plays_declined, s.pauses_issued,
            s.registered
        ));
        out
    }

    /// SHA-256 of the rendered trace, hex-encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.render().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn render_call(element: &str, call: &ElementCall) -> String {
    match call {
        ElementCall::Play => format!("play {}", element),
        ElementCall::Pause => format!("pause {}", element),
        ElementCall::SeekToStart => format!("seek {}", element),
        ElementCall::SetMuted(v) => format!("mute {} {}", element, v),
        ElementCall::SetInline(v) => format!("inline {} {}", element, v),
    }
}

/// A constructed scripted run, ready to execute once
pub struct Simulation {
    script: ScrollScript,
    coordinator: PlaybackCoordinator,
    tracker: GeometryTracker,
    scheduler: Arc<ManualScheduler>,
    journal: CallJournal,
}

impl Simulation {
    /// Wire a coordinator, a geometry tracker, and stub elements for every
    /// scripted item. Fails when the script or configuration is invalid.
    pub fn new(script: ScrollScript, config: CoordinatorConfig) -> Result<Self> {
        script.validate()?;
        let tracker = GeometryTracker::new(script.viewport_width, script.viewport_height);
        let scheduler = Arc::new(ManualScheduler::new());
        let coordinator = PlaybackCoordinator::new(
            config,
            Arc::new(tracker.clone()),
            scheduler.clone(),
        )?;
        let journal = CallJournal::new();

        for item in &script.items {
            let mut element = StubElement::new(item.id.clone()).with_journal(journal.clone());
            if item.declines {
                element = element.with_play_mode(PlayMode::Decline(PlaybackDeclined::NotAllowed));
            }
            tracker.set_target_bounds(
                item.id.clone(),
                Rect::new(0.0, item.top, script.viewport_width, item.height),
            );
            coordinator.register(item.id.clone(), Arc::new(element))?;
        }

        Ok(Self {
            script,
            coordinator,
            tracker,
            scheduler,
            journal,
        })
    }

    /// Run the timeline to completion and collect the trace
    pub fn run(self) -> DecisionTrace {
        for step in &self.script.steps {
            let now = self.scheduler.now();
            let at = Duration::from_millis(step.at_ms);
            if at > now {
                self.scheduler.advance(at - now);
            }
            self.scheduler.run_tasks();
            self.tracker.scroll_to(0.0, step.scroll_to);
        }
        self.scheduler.advance(Duration::from_millis(self.script.settle_ms));
        self.scheduler.run_tasks();

        let lines = self
            .journal
            .calls()
            .iter()
            .map(|(element, call)| render_call(element, call))
            .collect();
        DecisionTrace {
            lines,
            stats: self.coordinator.stats(),
        }
    }
}
