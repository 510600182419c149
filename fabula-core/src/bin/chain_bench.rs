//! Offline render benchmark for the processing chain.
//!
//! Renders a synthetic narration-shaped buffer through a representative
//! chain and reports per-iteration latency, optionally as JSON for CI
//! tracking:
//!
//! ```text
//! cargo run --bin chain_bench -- --seconds 30 --iterations 5 --json
//! ```

use std::time::Instant;

use serde::Serialize;

use fabula_core::dsp::chain::{
    CompressionParams, EqBand, FilterParams, HighPassParams, NormalizationParams,
    ParametricEqParams, PeakLimitingParams, ReverbParams,
};
use fabula_core::{AudioBuffer, ChainEngine, ProcessingChain};

#[derive(Debug)]
struct Args {
    seconds: f64,
    sample_rate: u32,
    iterations: usize,
    json: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    seconds: f64,
    sample_rate: u32,
    iterations: usize,
    p50_latency_ms: f64,
    p95_latency_ms: f64,
    avg_latency_ms: f64,
    realtime_factor: f64,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("chain_bench failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = parse_args()?;

    let buffer = synth_voice(args.seconds, args.sample_rate);
    let chain = bench_chain();
    chain.validate().map_err(|e| e.to_string())?;
    let engine = ChainEngine::new();

    // warm the impulse cache so iterations measure steady-state renders
    engine
        .process_blocking(&buffer, &chain)
        .map_err(|e| e.to_string())?;

    let mut latencies_ms = Vec::with_capacity(args.iterations);
    for _ in 0..args.iterations {
        let start = Instant::now();
        let out = engine
            .process_blocking(&buffer, &chain)
            .map_err(|e| e.to_string())?;
        latencies_ms.push(start.elapsed().as_secs_f64() * 1_000.0);
        assert_eq!(out.frames(), buffer.frames());
    }

    latencies_ms.sort_by(|a, b| a.total_cmp(b));
    let avg = latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64;
    let summary = Summary {
        seconds: args.seconds,
        sample_rate: args.sample_rate,
        iterations: args.iterations,
        p50_latency_ms: percentile(&latencies_ms, 0.50),
        p95_latency_ms: percentile(&latencies_ms, 0.95),
        avg_latency_ms: avg,
        realtime_factor: args.seconds * 1_000.0 / avg,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?
        );
    } else {
        println!(
            "{}s @ {} Hz, {} iterations: p50 {:.1} ms, p95 {:.1} ms, avg {:.1} ms ({:.0}x realtime)",
            summary.seconds,
            summary.sample_rate,
            summary.iterations,
            summary.p50_latency_ms,
            summary.p95_latency_ms,
            summary.avg_latency_ms,
            summary.realtime_factor
        );
    }
    Ok(())
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        seconds: 10.0,
        sample_rate: 44_100,
        iterations: 5,
        json: false,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--seconds" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --seconds".into());
                };
                args.seconds = v
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --seconds".to_string())?
                    .clamp(0.1, 600.0);
            }
            "--rate" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --rate".into());
                };
                args.sample_rate = v
                    .parse::<u32>()
                    .map_err(|_| "invalid value for --rate".to_string())?;
            }
            "--iterations" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --iterations".into());
                };
                args.iterations = v
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --iterations".to_string())?
                    .clamp(1, 50);
            }
            "--json" => args.json = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

/// Pitch-modulated tone plus a sibilance band — close enough to speech for
/// every stage to do real work.
fn synth_voice(seconds: f64, sample_rate: u32) -> AudioBuffer {
    let frames = (seconds * sample_rate as f64) as usize;
    let samples: Vec<f32> = (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let vibrato = (2.0 * std::f32::consts::PI * 5.0 * t).sin() * 4.0;
            let fundamental =
                (2.0 * std::f32::consts::PI * (160.0 + vibrato) * t).sin() * 0.35;
            let sibilance = (2.0 * std::f32::consts::PI * 6_200.0 * t).sin() * 0.06;
            fundamental + sibilance
        })
        .collect();
    AudioBuffer::from_mono(samples, sample_rate)
}

fn bench_chain() -> ProcessingChain {
    let mut chain = ProcessingChain::default();
    chain.noise_cleanup.high_pass_filter = Some(HighPassParams { frequency: 80.0 });
    chain.eq_shaping.low_pass = Some(FilterParams {
        frequency: 12_000.0,
        q: std::f32::consts::FRAC_1_SQRT_2,
    });
    chain.eq_shaping.parametric_eq = Some(ParametricEqParams {
        bands: vec![EqBand {
            frequency: 3_000.0,
            gain: 2.0,
            q: 1.0,
        }],
    });
    chain.dynamic_control.compression = Some(CompressionParams {
        threshold: -24.0,
        ratio: 3.0,
        attack: 10.0,
        release: 80.0,
    });
    chain.spatial_enhancement.reverb = Some(ReverbParams {
        room_size: 0.6,
        damping: 0.5,
        wet_level: 0.15,
    });
    chain.mastering.normalization = Some(NormalizationParams { target_lufs: -18.0 });
    chain.mastering.peak_limiting = Some(PeakLimitingParams::default());
    chain
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}
