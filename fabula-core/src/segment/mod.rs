//! Per-segment orchestration: resolve-or-generate raw narration, optional
//! preview processing, playback hand-off.
//!
//! ## Ordering
//!
//! One call runs `lookup → generate → store → return`, strictly in that
//! order — the store happens only after a complete, successful synthesis,
//! so an aborted generator call can never leave a partial cache entry.
//! Generator failures propagate unchanged; retry/backoff is the generator's
//! own business.
//!
//! Processed previews are **never** cached: chain configurations are an
//! open combinatorial space, and stale processed variants poisoning the raw
//! cache would be far worse than re-rendering a preview.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::audio::{wav, AudioBuffer};
use crate::cache::{compute_key, CacheKey, RawAudioCache};
use crate::dsp::{ChainEngine, ProcessingChain};
use crate::error::{FabulaError, Result};
use crate::playback::PlaybackScheduler;

/// One manuscript segment to narrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub text: String,
}

/// A cast voice plus its prosody settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voice {
    pub id: String,
    /// Opaque provider settings; canonicalized before fingerprinting.
    pub settings: Value,
}

/// Everything a TTS backend needs for one synthesis call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    pub voice_id: String,
    pub settings: Value,
}

/// Ties cache, generator, processing and playback together per segment.
pub struct SegmentAudioOrchestrator {
    cache: Arc<RawAudioCache>,
    chain_engine: Arc<ChainEngine>,
}

impl SegmentAudioOrchestrator {
    pub fn new(cache: Arc<RawAudioCache>, chain_engine: Arc<ChainEngine>) -> Self {
        Self {
            cache,
            chain_engine,
        }
    }

    /// The fingerprint this orchestrator uses for a segment/voice pair.
    pub fn cache_key(segment: &Segment, voice: &Voice) -> CacheKey {
        compute_key(&segment.text, &voice.id, &voice.settings)
    }

    /// Return raw WAV bytes for the segment, from cache when possible.
    ///
    /// On a miss the injected `generate` future runs; its output is probed
    /// for duration, stored, and returned. On generator failure the error
    /// propagates and the cache is left untouched.
    pub async fn get_or_generate_raw<G, Fut>(
        &self,
        segment: &Segment,
        voice: &Voice,
        generate: G,
    ) -> Result<Vec<u8>>
    where
        G: FnOnce(GenerationRequest) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        let key = Self::cache_key(segment, voice);

        if let Some(entry) = self.cache.lookup(&key).await? {
            debug!(segment = %segment.id, key = %key, "raw audio cache hit");
            return Ok(entry.audio_bytes);
        }

        debug!(segment = %segment.id, key = %key, "raw audio cache miss — generating");
        let request = GenerationRequest {
            text: segment.text.clone(),
            voice_id: voice.id.clone(),
            settings: voice.settings.clone(),
        };
        let bytes = generate(request).await.map_err(FabulaError::Generation)?;

        let probed = wav::probe(&bytes)?;
        self.cache
            .store(&key, bytes.clone(), probed.duration_secs())
            .await?;
        info!(
            segment = %segment.id,
            voice = %voice.id,
            bytes = bytes.len(),
            duration_secs = probed.duration_secs(),
            "segment synthesized and cached"
        );
        Ok(bytes)
    }

    /// Decoded, optionally processed audio for previewing a segment.
    ///
    /// The processed result is ephemeral — it is handed to the caller and
    /// never written back to any cache.
    pub async fn preview_with_processing<G, Fut>(
        &self,
        segment: &Segment,
        voice: &Voice,
        chain: Option<&ProcessingChain>,
        generate: G,
    ) -> Result<AudioBuffer>
    where
        G: FnOnce(GenerationRequest) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        let bytes = self.get_or_generate_raw(segment, voice, generate).await?;

        let decoded = tokio::task::spawn_blocking(move || wav::decode(&bytes))
            .await
            .map_err(|e| FabulaError::Other(anyhow::anyhow!("decode task failed: {e}")))??;

        match chain {
            Some(chain) => {
                self.chain_engine
                    .process(Arc::new(decoded), chain)
                    .await
            }
            None => Ok(decoded),
        }
    }

    /// Full preview flow: resolve, decode, process, load and play.
    pub async fn play_preview<G, Fut>(
        &self,
        segment: &Segment,
        voice: &Voice,
        chain: Option<&ProcessingChain>,
        generate: G,
        scheduler: &PlaybackScheduler,
    ) -> Result<()>
    where
        G: FnOnce(GenerationRequest) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        let buffer = self
            .preview_with_processing(segment, voice, chain, generate)
            .await?;
        scheduler.load(Arc::new(buffer), segment.id.clone());
        scheduler.play().await
    }
}
