//! Real audio output via cpal.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate heap memory, block on a mutex, or perform I/O.
//! This module satisfies that contract by resampling and laying out the
//! buffer *before* the stream starts; the callback only copies samples and
//! bumps atomics.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Every source therefore owns a dedicated thread that opens the
//! device, holds the stream, and drops it on the same thread. The ended
//! callback fires from that thread after a natural end — never after an
//! explicit stop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::audio::{resample, AudioBuffer};
use crate::error::{FabulaError, Result};
use super::engine::{ActiveSource, AudioEngine, EndedCallback};

/// How often the holder thread polls for stop/ended.
const HOLDER_POLL: Duration = Duration::from_millis(10);

/// Output engine bound to the system's cpal host.
pub struct CpalEngine {
    preferred_device: Option<String>,
}

impl CpalEngine {
    /// Use the default output device.
    pub fn new() -> Self {
        Self {
            preferred_device: None,
        }
    }

    /// Prefer an output device by name, falling back to the default.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            preferred_device: Some(name.into()),
        }
    }
}

impl Default for CpalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for CpalEngine {
    fn ensure_running(&self) -> Result<()> {
        // cpal holds no suspended state of its own; running means a device
        // is reachable.
        let host = cpal::default_host();
        if host.default_output_device().is_none() {
            return Err(FabulaError::AudioEngine(
                "no default output device".into(),
            ));
        }
        Ok(())
    }

    fn start_source(
        &self,
        buffer: Arc<AudioBuffer>,
        offset_secs: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn ActiveSource>> {
        let stop = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        let frames_played = Arc::new(AtomicU64::new(0));

        let preferred = self.preferred_device.clone();
        let thread_stop = Arc::clone(&stop);
        let thread_ended = Arc::clone(&ended);
        let thread_frames = Arc::clone(&frames_played);

        // Sync handshake: the holder thread reports the device rate (or the
        // open failure) before start_source returns.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        thread::spawn(move || {
            let opened = open_output(
                preferred.as_deref(),
                &buffer,
                offset_secs,
                Arc::clone(&thread_stop),
                Arc::clone(&thread_ended),
                thread_frames,
            );

            let stream = match opened {
                Ok((stream, device_rate)) => {
                    let _ = open_tx.send(Ok(device_rate));
                    stream
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };

            while !thread_stop.load(Ordering::Relaxed) && !thread_ended.load(Ordering::Relaxed) {
                thread::sleep(HOLDER_POLL);
            }

            // Stream drops here, releasing the device on this thread.
            drop(stream);

            if thread_ended.load(Ordering::Relaxed) && !thread_stop.load(Ordering::Relaxed) {
                debug!("source reached end of buffer");
                on_ended();
            }
        });

        let device_rate = open_rx
            .recv()
            .map_err(|_| FabulaError::AudioEngine("playback thread died during open".into()))??;

        Ok(Box::new(CpalSource {
            offset_secs,
            device_rate,
            frames_played,
            stop,
            stopped: false,
        }))
    }
}

type OpenResult = std::result::Result<(cpal::Stream, u32), FabulaError>;

/// Open the output device and build the stream. Runs on the holder thread.
fn open_output(
    preferred: Option<&str>,
    buffer: &Arc<AudioBuffer>,
    offset_secs: f64,
    stop: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
) -> OpenResult {
    let host = cpal::default_host();

    let mut selected = None;
    if let Some(name) = preferred {
        match host.output_devices() {
            Ok(mut devices) => {
                selected = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                if selected.is_none() {
                    warn!("preferred output device '{name}' not found, falling back");
                }
            }
            Err(e) => warn!("failed to list output devices: {e}"),
        }
    }
    let device = match selected.or_else(|| host.default_output_device()) {
        Some(device) => device,
        None => return Err(FabulaError::AudioEngine("no output device available".into())),
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| FabulaError::AudioEngine(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(FabulaError::AudioEngine(format!(
            "unsupported output sample format: {:?}",
            supported.sample_format()
        )));
    }

    let device_rate = supported.sample_rate().0;
    let device_channels = supported.channels();
    let config = StreamConfig {
        channels: device_channels,
        sample_rate: SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // All allocation happens here, before the stream exists.
    let rendered = if device_rate == buffer.sample_rate() {
        Arc::clone(buffer)
    } else {
        debug!(
            from = buffer.sample_rate(),
            to = device_rate,
            "resampling buffer for device"
        );
        Arc::new(resample::resample_buffer(buffer, device_rate)?)
    };

    let total_frames = rendered.frames() as u64;
    let start_frame = ((offset_secs * device_rate as f64) as u64).min(total_frames);
    let out_channels = device_channels as usize;
    let source_channels = rendered.channel_count();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info| {
                if stop.load(Ordering::Relaxed) || ended.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                let mut frame_index = start_frame + frames_played.load(Ordering::Relaxed);
                let mut written = 0u64;
                for frame in data.chunks_mut(out_channels) {
                    if frame_index >= total_frames {
                        frame.fill(0.0);
                        continue;
                    }
                    for (channel, sample) in frame.iter_mut().enumerate() {
                        let source_channel = channel.min(source_channels - 1);
                        *sample = rendered.channel(source_channel)[frame_index as usize];
                    }
                    frame_index += 1;
                    written += 1;
                }

                frames_played.fetch_add(written, Ordering::Relaxed);
                if frame_index >= total_frames {
                    ended.store(true, Ordering::Release);
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| FabulaError::AudioEngine(e.to_string()))?;

    stream
        .play()
        .map_err(|e| FabulaError::AudioEngine(e.to_string()))?;

    Ok((stream, device_rate))
}

/// Handle to one playing cpal source.
struct CpalSource {
    offset_secs: f64,
    device_rate: u32,
    frames_played: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    stopped: bool,
}

impl ActiveSource for CpalSource {
    fn position_secs(&self) -> f64 {
        self.offset_secs
            + self.frames_played.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        // A dropped handle must not leave the device thread running.
        self.stop();
    }
}
