//! Buffer-accurate playback scheduling.
//!
//! ## State machine
//!
//! ```text
//! Idle ──load()──► Loading ──► Idle(buffer ready)
//!   │                              │ play()
//!   │                              ▼
//!   ◄──stop()/ended────────── Playing ⇄ Paused
//! ```
//!
//! Exactly one source is audible system-wide: every `play` tears down the
//! previous source synchronously before any new state exists. Operations
//! invalid for the current state (pause while idle, a double-clicked play
//! with no buffer) are absorbed as logged no-ops — UI races must never
//! crash playback.
//!
//! `play`/`resume` are async: the shared engine may be suspended and is
//! resumed first, so callers must not assume output has started the
//! instant the call was issued — only once it resolves.

pub mod engine;

#[cfg(feature = "audio-cpal")]
pub mod output;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::audio::AudioBuffer;
use crate::error::{FabulaError, Result};
use engine::{ActiveSource, AudioEngine, EndedCallback};

/// Broadcast capacity: 256 playback events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Lifecycle phase of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No source playing. A buffer may or may not be loaded.
    Idle,
    /// A buffer is being installed (transient, inside `load`).
    Loading,
    /// A source is audible.
    Playing,
    /// Playback suspended; the resume offset is retained.
    Paused,
}

/// Snapshot of playback for UI consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_time_seconds: f64,
    pub duration_seconds: f64,
    pub active_segment_id: Option<String>,
}

/// Published on the scheduler's broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum PlaybackEvent {
    StateChanged { state: PlaybackState },
    /// Natural end-of-buffer — fired in addition to the state change, so
    /// subscribers can tell it apart from a manual stop.
    Ended { segment_id: Option<String> },
}

/// Single-active-source playback controller.
///
/// Clone-cheap (`Arc` inside); all methods take `&self`.
pub struct PlaybackScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn AudioEngine>,
    state: Mutex<SchedulerState>,
    events: broadcast::Sender<PlaybackEvent>,
    /// Bumped on every source start; stale ended signals are discarded.
    generation: AtomicU64,
}

struct SchedulerState {
    phase: Phase,
    buffer: Option<Arc<AudioBuffer>>,
    segment_id: Option<String>,
    offset_secs: f64,
    source: Option<Box<dyn ActiveSource>>,
}

impl PlaybackScheduler {
    pub fn new(engine: Arc<dyn AudioEngine>) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            inner: Arc::new(Inner {
                engine,
                state: Mutex::new(SchedulerState {
                    phase: Phase::Idle,
                    buffer: None,
                    segment_id: None,
                    offset_secs: 0.0,
                    source: None,
                }),
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to state-change and ended events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    /// Install a decoded buffer for `segment_id`, discarding the previous
    /// buffer and tearing down any active source.
    pub fn load(&self, buffer: Arc<AudioBuffer>, segment_id: impl Into<String>) {
        let segment_id = segment_id.into();
        let mut state = self.inner.state.lock();
        Inner::stop_source(&mut state);

        state.phase = Phase::Loading;
        self.inner.emit_state(&state);

        info!(
            segment = %segment_id,
            frames = buffer.frames(),
            duration_secs = buffer.duration_secs(),
            "buffer loaded"
        );
        state.buffer = Some(buffer);
        state.segment_id = Some(segment_id);
        state.offset_secs = 0.0;
        state.phase = Phase::Idle;
        self.inner.emit_state(&state);
    }

    /// Start playback from the beginning of the loaded buffer.
    pub async fn play(&self) -> Result<()> {
        self.play_from(0.0).await
    }

    /// Start playback at `offset_secs` into the loaded buffer.
    ///
    /// Resumes the shared engine first (awaited), then tears down any
    /// currently active source before starting the new one.
    pub async fn play_from(&self, offset_secs: f64) -> Result<()> {
        if self.inner.state.lock().buffer.is_none() {
            warn!("play ignored — no buffer loaded");
            return Ok(());
        }

        let engine = Arc::clone(&self.inner.engine);
        tokio::task::spawn_blocking(move || engine.ensure_running())
            .await
            .map_err(|e| FabulaError::AudioEngine(format!("engine resume task failed: {e}")))??;

        self.inner.start_at(offset_secs)
    }

    /// Record the playhead as the resume offset and stop the source.
    /// No-op unless currently `Playing`.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Playing {
            debug!(phase = ?state.phase, "pause ignored");
            return;
        }
        let position = state.source.as_ref().map(|s| s.position_secs());
        if let Some(position) = position {
            state.offset_secs = position;
        }
        Inner::stop_source(&mut state);
        state.phase = Phase::Paused;
        debug!(offset_secs = state.offset_secs, "paused");
        self.inner.emit_state(&state);
    }

    /// Continue from the recorded pause offset. No-op unless `Paused`.
    pub async fn resume(&self) -> Result<()> {
        let offset_secs = {
            let state = self.inner.state.lock();
            if state.phase != Phase::Paused {
                debug!(phase = ?state.phase, "resume ignored");
                return Ok(());
            }
            state.offset_secs
        };
        self.play_from(offset_secs).await
    }

    /// Move the playhead. While `Playing` the source restarts at the new
    /// offset; otherwise only the stored offset changes. No-op without a
    /// loaded buffer.
    pub fn seek(&self, time_secs: f64) -> Result<()> {
        let mut state = self.inner.state.lock();
        let Some(buffer) = state.buffer.clone() else {
            warn!("seek ignored — no buffer loaded");
            return Ok(());
        };
        let target = time_secs.clamp(0.0, buffer.duration_secs());

        if state.phase == Phase::Playing {
            // Engine is already running — restart the source in place.
            drop(state);
            return self.inner.start_at(target);
        }

        state.offset_secs = target;
        debug!(offset_secs = target, phase = ?state.phase, "seek stored");
        self.inner.emit_state(&state);
        Ok(())
    }

    /// Tear down any source, reset the playhead to zero, go `Idle`.
    /// Idempotent — stopping an idle scheduler is a no-op.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Idle && state.source.is_none() {
            debug!("stop ignored — already idle");
            return;
        }
        Inner::stop_source(&mut state);
        state.offset_secs = 0.0;
        state.phase = Phase::Idle;
        info!("playback stopped");
        self.inner.emit_state(&state);
    }

    /// Current snapshot.
    pub fn state(&self) -> PlaybackState {
        Inner::snapshot(&self.inner.state.lock())
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }
}

impl Clone for PlaybackScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Inner {
    /// Start a source at `offset_secs`. The previous source is torn down
    /// before any new state is created — this is where the single-active-
    /// source invariant lives.
    fn start_at(self: &Arc<Self>, offset_secs: f64) -> Result<()> {
        let mut state = self.state.lock();
        let Some(buffer) = state.buffer.clone() else {
            warn!("play ignored — no buffer loaded");
            return Ok(());
        };

        Self::stop_source(&mut state);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let offset_secs = offset_secs.clamp(0.0, buffer.duration_secs());

        let weak = Arc::downgrade(self);
        let on_ended: EndedCallback = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_source_ended(generation);
            }
        });

        let source = match self.engine.start_source(buffer, offset_secs, on_ended) {
            Ok(source) => source,
            Err(e) => {
                state.phase = Phase::Idle;
                self.emit_state(&state);
                return Err(e);
            }
        };

        state.offset_secs = offset_secs;
        state.source = Some(source);
        state.phase = Phase::Playing;
        debug!(offset_secs, generation, "source started");
        self.emit_state(&state);
        Ok(())
    }

    fn stop_source(state: &mut SchedulerState) {
        if let Some(mut source) = state.source.take() {
            source.stop();
        }
    }

    /// Natural end-of-buffer signal from the engine.
    fn on_source_ended(&self, generation: u64) {
        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) != generation || state.phase != Phase::Playing {
            debug!(generation, "stale ended signal ignored");
            return;
        }

        state.source = None;
        state.offset_secs = 0.0;
        state.phase = Phase::Idle;
        let segment_id = state.segment_id.clone();
        info!(segment = ?segment_id, "playback reached end of buffer");

        let _ = self.events.send(PlaybackEvent::Ended {
            segment_id,
        });
        self.emit_state(&state);
    }

    fn emit_state(&self, state: &SchedulerState) {
        let _ = self.events.send(PlaybackEvent::StateChanged {
            state: Self::snapshot(state),
        });
    }

    fn snapshot(state: &SchedulerState) -> PlaybackState {
        let duration_seconds = state
            .buffer
            .as_ref()
            .map(|b| b.duration_secs())
            .unwrap_or(0.0);
        let current_time_seconds = match state.phase {
            Phase::Playing => state
                .source
                .as_ref()
                .map(|s| s.position_secs())
                .unwrap_or(state.offset_secs),
            _ => state.offset_secs,
        };
        PlaybackState {
            is_playing: state.phase == Phase::Playing,
            current_time_seconds,
            duration_seconds,
            active_segment_id: state.segment_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::engine::StubEngine;
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn setup() -> (PlaybackScheduler, Arc<StubEngine>) {
        let engine = Arc::new(StubEngine::new());
        let scheduler = PlaybackScheduler::new(Arc::clone(&engine) as Arc<dyn AudioEngine>);
        (scheduler, engine)
    }

    fn five_second_buffer() -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::silence(1, 5 * 44_100, 44_100))
    }

    fn drain_events(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return events,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => return events,
            }
        }
    }

    #[tokio::test]
    async fn play_without_buffer_is_a_noop() {
        let (scheduler, engine) = setup();
        scheduler.play().await.unwrap();
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert!(engine.started_offsets().is_empty());
    }

    #[tokio::test]
    async fn play_resumes_engine_before_starting() {
        let (scheduler, engine) = setup();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();
        assert_eq!(engine.resume_calls(), 1);
        assert_eq!(engine.started_offsets(), vec![0.0]);
        assert_eq!(scheduler.phase(), Phase::Playing);
    }

    #[tokio::test]
    async fn starting_a_new_segment_stops_the_previous_source() {
        let (scheduler, engine) = setup();
        scheduler.load(five_second_buffer(), "seg-a");
        scheduler.play().await.unwrap();
        assert_eq!(engine.active_count(), 1);

        scheduler.load(five_second_buffer(), "seg-b");
        scheduler.play().await.unwrap();

        // never two audible sources
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.started_offsets().len(), 2);
        let state = scheduler.state();
        assert_eq!(state.active_segment_id.as_deref(), Some("seg-b"));
    }

    #[tokio::test]
    async fn replaying_restarts_the_single_source() {
        let (scheduler, engine) = setup();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();
        scheduler.play().await.unwrap();
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.started_offsets(), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn pause_records_elapsed_and_resume_continues_there() {
        let (scheduler, engine) = setup();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();

        engine.advance_current(1.5);
        scheduler.pause();
        assert_eq!(scheduler.phase(), Phase::Paused);
        let state = scheduler.state();
        assert!((state.current_time_seconds - 1.5).abs() < 1e-9);

        scheduler.resume().await.unwrap();
        assert_eq!(scheduler.phase(), Phase::Playing);
        assert_eq!(engine.started_offsets(), vec![0.0, 1.5]);
    }

    #[tokio::test]
    async fn pause_while_idle_or_paused_is_a_noop() {
        let (scheduler, _engine) = setup();
        scheduler.pause();
        assert_eq!(scheduler.phase(), Phase::Idle);

        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();
        scheduler.pause();
        scheduler.pause();
        assert_eq!(scheduler.phase(), Phase::Paused);
    }

    #[tokio::test]
    async fn seek_while_paused_updates_offset_without_playing() {
        let (scheduler, engine) = setup();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();
        scheduler.pause();

        scheduler.seek(2.5).unwrap();
        assert_eq!(scheduler.phase(), Phase::Paused);
        let state = scheduler.state();
        assert!((state.current_time_seconds - 2.5).abs() < 1e-9);
        assert!(!state.is_playing);

        scheduler.resume().await.unwrap();
        assert_eq!(*engine.started_offsets().last().unwrap(), 2.5);
    }

    #[tokio::test]
    async fn seek_while_playing_restarts_at_the_new_offset() {
        let (scheduler, engine) = setup();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();

        scheduler.seek(3.0).unwrap();
        assert_eq!(scheduler.phase(), Phase::Playing);
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.started_offsets(), vec![0.0, 3.0]);
    }

    #[tokio::test]
    async fn seek_clamps_to_buffer_duration() {
        let (scheduler, _engine) = setup();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.seek(99.0).unwrap();
        let state = scheduler.state();
        assert!((state.current_time_seconds - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stop_resets_position_and_is_idempotent() {
        let (scheduler, engine) = setup();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();
        engine.advance_current(2.0);

        scheduler.stop();
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert_eq!(scheduler.state().current_time_seconds, 0.0);
        assert_eq!(engine.active_count(), 0);

        scheduler.stop();
        assert_eq!(scheduler.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn natural_end_goes_idle_and_fires_ended_event() {
        let (scheduler, engine) = setup();
        let mut rx = scheduler.subscribe();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();
        drain_events(&mut rx);

        engine.finish_current();
        assert_eq!(scheduler.phase(), Phase::Idle);

        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            PlaybackEvent::Ended { segment_id: Some(id) } if id == "seg-1"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            PlaybackEvent::StateChanged { state } if !state.is_playing
        )));
    }

    #[tokio::test]
    async fn ended_after_stop_is_ignored() {
        let (scheduler, engine) = setup();
        let mut rx = scheduler.subscribe();
        scheduler.load(five_second_buffer(), "seg-1");
        scheduler.play().await.unwrap();
        scheduler.stop();
        drain_events(&mut rx);

        engine.finish_current();
        assert!(drain_events(&mut rx).is_empty());
        assert_eq!(scheduler.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn load_emits_loading_then_idle() {
        let (scheduler, _engine) = setup();
        let mut rx = scheduler.subscribe();
        scheduler.load(five_second_buffer(), "seg-1");

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(
            matches!(&events[1], PlaybackEvent::StateChanged { state } if state.duration_seconds > 4.9)
        );
    }

    #[test]
    fn playback_state_serializes_camel_case() {
        let state = PlaybackState {
            is_playing: true,
            current_time_seconds: 1.5,
            duration_seconds: 10.0,
            active_segment_id: Some("seg-1".into()),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isPlaying"], true);
        assert_eq!(json["activeSegmentId"], "seg-1");
        assert!(json["currentTimeSeconds"].is_number());
    }
}
