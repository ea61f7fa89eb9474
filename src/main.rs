//! airband - SDR signal pipeline
//!
//! Pulls raw IQ samples from an RTL-SDR, and depending on mode produces
//! log-power spectra, demodulated FM/AM audio, or decoded Mode S/ADS-B
//! messages.

mod adsb;
mod config;
mod dsp;
mod pipeline;
mod source;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use adsb::DecodedMessage;
use config::Config;
use pipeline::{Mode, Outputs, Pipeline};
use source::RtlSdrSource;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   airband - SDR signal pipeline");
    info!("===========================================");

    let config = Config::from_env();
    info!("Configuration:");
    info!("  Mode: {:?}", config.mode);
    info!("  Frequency: {} MHz", config.frequency_hz as f64 / 1e6);
    info!("  Device index: {}", config.device_index);
    info!("  Gain: {} dB", config.gain_db);
    info!("  PPM error: {}", config.ppm_error);
    info!("  FFT size: {}", config.fft_size);
    info!("  Fix errors: {} (aggressive: {})", config.fix_errors, config.aggressive);

    let (spectrum_tx, mut spectrum_rx) = mpsc::channel::<Vec<f32>>(16);
    let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<f32>>(64);
    let (frame_tx, mut frame_rx) = mpsc::channel::<DecodedMessage>(1000);

    // Consumers. Spectra and audio chunks are summarized at debug; decoded
    // frames go out as JSON lines for downstream tooling.
    let spectrum_task = tokio::spawn(async move {
        while let Some(spectrum) = spectrum_rx.recv().await {
            let peak = spectrum.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            debug!("spectrum: {} bins, peak {:.1} dB", spectrum.len(), peak);
        }
    });

    let audio_task = tokio::spawn(async move {
        let mut samples = 0u64;
        while let Some(chunk) = audio_rx.recv().await {
            samples += chunk.len() as u64;
            debug!("audio: {} samples ({} total)", chunk.len(), samples);
        }
    });

    let frame_task = tokio::spawn(async move {
        while let Some(mm) = frame_rx.recv().await {
            match serde_json::to_string(&mm) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("failed to serialize frame: {}", e),
            }
        }
    });

    let source = Box::new(RtlSdrSource::new(
        config.rtl_sdr_path.clone(),
        config.device_index,
        config.gain_db,
        config.ppm_error,
    ));

    let initial_mode = config.mode;
    let pipeline = Pipeline::new(
        config,
        Outputs {
            spectrum: spectrum_tx,
            audio: audio_tx,
            frames: frame_tx,
        },
    )?;

    let (command_tx, command_rx) = mpsc::channel::<Mode>(4);
    command_tx
        .send(initial_mode)
        .await
        .map_err(|_| anyhow::anyhow!("pipeline command channel closed"))?;

    let pipeline_task = tokio::spawn(pipeline.run(source, command_rx));

    info!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    // Go idle between blocks, then close the command channel so the
    // pipeline loop exits.
    let _ = command_tx.send(Mode::Idle).await;
    drop(command_tx);

    match pipeline_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("pipeline error: {:#}", e),
        Err(e) => error!("pipeline task panicked: {}", e),
    }

    spectrum_task.abort();
    audio_task.abort();
    frame_task.abort();

    info!("Shutdown complete.");
    Ok(())
}
