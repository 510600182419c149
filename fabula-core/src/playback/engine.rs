//! Audio engine abstraction.
//!
//! The process-wide output context is modelled as an injectable handle
//! rather than a module-level singleton: the application wires
//! [`CpalEngine`](super::output::CpalEngine), while tests and headless
//! tools drive [`StubEngine`] by hand. The scheduler never talks to a
//! device directly.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::AudioBuffer;
use crate::error::Result;

/// Fired exactly once when a source reaches its natural end of buffer.
/// Never fired for sources that were stopped explicitly.
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Contract for audio output backends.
pub trait AudioEngine: Send + Sync {
    /// Bring the engine out of suspension. Called before every source
    /// start; may block while the underlying context spins up. Idempotent.
    fn ensure_running(&self) -> Result<()>;

    /// Start rendering `buffer` from `offset_secs` into the buffer.
    ///
    /// The returned source is already audible when this returns. `on_ended`
    /// fires only on natural end-of-buffer.
    fn start_source(
        &self,
        buffer: Arc<AudioBuffer>,
        offset_secs: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn ActiveSource>>;
}

/// A single playing source.
pub trait ActiveSource: Send {
    /// Playhead within the buffer, in seconds (start offset included).
    fn position_secs(&self) -> f64;

    /// Silence and release the source immediately. Idempotent; suppresses
    /// the ended callback.
    fn stop(&mut self);
}

/// Manually driven engine for tests and headless preview.
///
/// Nothing is audible; sources advance only when the caller says so.
/// `finish_current` simulates natural end-of-buffer, which is how the
/// scheduler's ended handling is exercised without a device.
#[derive(Default)]
pub struct StubEngine {
    state: Mutex<StubEngineState>,
}

#[derive(Default)]
struct StubEngineState {
    resume_calls: usize,
    sources: Vec<Arc<Mutex<StubSourceState>>>,
}

struct StubSourceState {
    offset_secs: f64,
    position_secs: f64,
    stopped: bool,
    on_ended: Option<EndedCallback>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `ensure_running` has been called.
    pub fn resume_calls(&self) -> usize {
        self.state.lock().resume_calls
    }

    /// Start offsets of every source ever created, in creation order.
    pub fn started_offsets(&self) -> Vec<f64> {
        self.state
            .lock()
            .sources
            .iter()
            .map(|s| s.lock().offset_secs)
            .collect()
    }

    /// Sources that have not been stopped.
    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .sources
            .iter()
            .filter(|s| !s.lock().stopped)
            .count()
    }

    /// Advance the playhead of the current (latest non-stopped) source.
    pub fn advance_current(&self, secs: f64) {
        if let Some(source) = self.current() {
            source.lock().position_secs += secs;
        }
    }

    /// Simulate the current source reaching its natural end. The ended
    /// callback runs on this thread, outside any engine lock.
    pub fn finish_current(&self) {
        let callback = self.current().and_then(|source| {
            let mut state = source.lock();
            state.stopped = true;
            state.on_ended.take()
        });
        if let Some(callback) = callback {
            callback();
        }
    }

    fn current(&self) -> Option<Arc<Mutex<StubSourceState>>> {
        self.state
            .lock()
            .sources
            .iter()
            .rev()
            .find(|s| !s.lock().stopped)
            .map(Arc::clone)
    }
}

impl AudioEngine for StubEngine {
    fn ensure_running(&self) -> Result<()> {
        self.state.lock().resume_calls += 1;
        Ok(())
    }

    fn start_source(
        &self,
        _buffer: Arc<AudioBuffer>,
        offset_secs: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn ActiveSource>> {
        let source = Arc::new(Mutex::new(StubSourceState {
            offset_secs,
            position_secs: offset_secs,
            stopped: false,
            on_ended: Some(on_ended),
        }));
        self.state.lock().sources.push(Arc::clone(&source));
        Ok(Box::new(StubSource { state: source }))
    }
}

struct StubSource {
    state: Arc<Mutex<StubSourceState>>,
}

impl ActiveSource for StubSource {
    fn position_secs(&self) -> f64 {
        self.state.lock().position_secs
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.on_ended = None;
    }
}
