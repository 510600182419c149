//! # fabula-core
//!
//! Client-side audio core of the Fabula audiobook studio.
//!
//! ## Architecture
//!
//! ```text
//! text + voice + prosody settings
//!         │  SHA-256 over canonical settings JSON
//!         ▼
//!   RawAudioCache ──miss──► injected TTS generator ──► store
//!         │ raw WAV bytes
//!         ▼
//!      wav::decode ──► ChainEngine (optional, never cached)
//!         │                     │
//!         ▼                     ▼
//!  waveform::extract    PlaybackScheduler ──► AudioEngine (cpal / stub)
//! ```
//!
//! Storage I/O and DSP renders run through `spawn_blocking`; the playback
//! state machine publishes events on a `tokio::sync::broadcast` channel.
//! Decoded buffers are immutable and `Arc`-shared, so extraction, rendering
//! and playback can read the same audio concurrently.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod cache;
pub mod dsp;
pub mod error;
pub mod playback;
pub mod segment;
pub mod waveform;

// Convenience re-exports for downstream crates
pub use audio::AudioBuffer;
pub use cache::{
    compute_key, ByteStore, CacheConfig, CacheEntry, CacheKey, FsStore, MemoryStore, RawAudioCache,
};
pub use dsp::{chain::ProcessingChain, ChainEngine};
pub use error::FabulaError;
pub use playback::engine::{ActiveSource, AudioEngine, StubEngine};
pub use playback::{PlaybackEvent, PlaybackScheduler, PlaybackState};
pub use segment::{GenerationRequest, Segment, SegmentAudioOrchestrator, Voice};

#[cfg(feature = "audio-cpal")]
pub use playback::output::CpalEngine;
