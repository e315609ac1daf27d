//! Media element capability surface.
//!
//! [`MediaElement`] is the narrow interface the coordinator drives. Embedders
//! implement it over their real player; [`StubElement`] keeps everything
//! in-memory for deterministic tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a requested play did not start.
///
/// These are expected outcomes of driving media from visibility, not
/// coordinator faults, and are surfaced separately from [`crate::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackDeclined {
    /// The platform's autoplay policy blocked the request
    #[error("autoplay blocked by platform policy")]
    NotAllowed,

    /// The element went away before the request settled
    #[error("element detached before playback could start")]
    Detached,

    /// The media backend failed to start
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Settlement of a play request
pub type PlayOutcome = std::result::Result<(), PlaybackDeclined>;

/// The capabilities the coordinator needs from a media element.
///
/// `play` settles asynchronously and may be declined; everything else is
/// fire-and-forget. Implementations must tolerate redundant calls (pausing a
/// paused element, muting a muted one).
pub trait MediaElement: Send + Sync {
    /// Request playback. The returned future settles when the platform
    /// accepts or declines the request.
    fn play(&self) -> BoxFuture<'static, PlayOutcome>;

    /// Halt playback immediately
    fn pause(&self);

    /// Rewind to the beginning without changing play state
    fn seek_to_start(&self);

    fn set_muted(&self, muted: bool);

    /// Hint that the element renders inline rather than fullscreen
    fn set_inline(&self, inline: bool);

    /// Whether enough media is buffered to start or seek
    fn is_ready(&self) -> bool;

    fn is_paused(&self) -> bool;
}

/// One recorded call against a [`StubElement`]
#[derive(Debug, Clone, PartialEq)]
pub enum ElementCall {
    Play,
    Pause,
    SeekToStart,
    SetMuted(bool),
    SetInline(bool),
}

/// Shared recorder collecting calls across many stub elements in issue order
#[derive(Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<(String, ElementCall)>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, element: &str, call: ElementCall) {
        self.calls
            .lock()
            .unwrap()
            .push((element.to_string(), call));
    }

    pub fn calls(&self) -> Vec<(String, ElementCall)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

/// How a [`StubElement`] settles play requests
#[derive(Debug, Clone)]
pub enum PlayMode {
    /// Settle successfully as soon as the future is polled
    Grant,
    /// Settle with the given decline as soon as the future is polled
    Decline(PlaybackDeclined),
    /// Hold every request until [`StubElement::resolve_next_play`]
    Manual,
}

struct StubState {
    mode: PlayMode,
    ready: bool,
    paused: bool,
    muted: bool,
    inline: bool,
    calls: Vec<ElementCall>,
    pending: VecDeque<oneshot::Sender<PlayOutcome>>,
}

/// In-memory element that records every call for assertions
pub struct StubElement {
    id: String,
    journal: Option<CallJournal>,
    state: Mutex<StubState>,
}

impl StubElement {
    /// Ready, paused element that grants every play request
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            journal: None,
            state: Mutex::new(StubState {
                mode: PlayMode::Grant,
                ready: true,
                paused: true,
                muted: false,
                inline: false,
                calls: Vec::new(),
                pending: VecDeque::new(),
            }),
        }
    }

    pub fn with_play_mode(self, mode: PlayMode) -> Self {
        self.state.lock().unwrap().mode = mode;
        self
    }

    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    /// Every call made against this element, in order
    pub fn calls(&self) -> Vec<ElementCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn play_count(&self) -> usize {
        self.count(|c| matches!(c, ElementCall::Play))
    }

    pub fn pause_count(&self) -> usize {
        self.count(|c| matches!(c, ElementCall::Pause))
    }

    pub fn seek_count(&self) -> usize {
        self.count(|c| matches!(c, ElementCall::SeekToStart))
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    pub fn is_inline(&self) -> bool {
        self.state.lock().unwrap().inline
    }

    /// Play requests held open in `Manual` mode
    pub fn pending_plays(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Settle the oldest held play request. Returns false when none is held.
    pub fn resolve_next_play(&self, outcome: PlayOutcome) -> bool {
        let sender = {
            let mut state = self.state.lock().unwrap();
            let Some(sender) = state.pending.pop_front() else {
                return false;
            };
            if outcome.is_ok() {
                state.paused = false;
            }
            sender
        };
        // Receiver may be gone if the coordinator abandoned the attempt
        let _ = sender.send(outcome);
        true
    }

    fn count(&self, pred: impl Fn(&ElementCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ElementCall) {
        if let Some(journal) = &self.journal {
            journal.record(&self.id, call.clone());
        }
        self.state.lock().unwrap().calls.push(call);
    }
}

impl MediaElement for StubElement {
    fn play(&self) -> BoxFuture<'static, PlayOutcome> {
        self.record(ElementCall::Play);
        let mut state = self.state.lock().unwrap();
        match state.mode.clone() {
            PlayMode::Grant => {
                state.paused = false;
                future::ready(Ok(())).boxed()
            }
            PlayMode::Decline(declined) => future::ready(Err(declined)).boxed(),
            PlayMode::Manual => {
                let (tx, rx) = oneshot::channel();
                state.pending.push_back(tx);
                async move {
                    match rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(PlaybackDeclined::Detached),
                    }
                }
                .boxed()
            }
        }
    }

    fn pause(&self) {
        self.record(ElementCall::Pause);
        self.state.lock().unwrap().paused = true;
    }

    fn seek_to_start(&self) {
        self.record(ElementCall::SeekToStart);
    }

    fn set_muted(&self, muted: bool) {
        self.record(ElementCall::SetMuted(muted));
        self.state.lock().unwrap().muted = muted;
    }

    fn set_inline(&self, inline: bool) {
        self.record(ElementCall::SetInline(inline));
        self.state.lock().unwrap().inline = inline;
    }

    fn is_ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }
}
