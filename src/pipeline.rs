//! Mode state machine and block pipeline.
//!
//! Acquisition runs on its own thread and feeds a bounded queue; when the
//! queue is full the oldest unconsumed block is dropped so the source is
//! never blocked indefinitely. The control loop takes one block at a time
//! and fully processes it before the next, so a mode switch between blocks
//! can never see a half-processed block: the queue is drained, the
//! discriminators and detector are rebuilt, and the source is reconfigured
//! before the first block of the new mode.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adsb::{DecodedMessage, FrameDetector};
use crate::config::Config;
use crate::dsp::{
    decimate, AmDiscriminator, FmDiscriminator, SpectrumAnalyzer, AM_DECIMATION, FM_DECIMATION,
};
use crate::source::{SampleSource, SourceError};

/// Processing mode. Weather shares the FM chain; it exists as its own mode
/// so a switch retunes and resets state like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Spectrum,
    Fm,
    Am,
    Weather,
    Adsb,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Some(Mode::Idle),
            "spectrum" => Some(Mode::Spectrum),
            "fm" => Some(Mode::Fm),
            "am" => Some(Mode::Am),
            "weather" => Some(Mode::Weather),
            "adsb" => Some(Mode::Adsb),
            _ => None,
        }
    }

    /// Source sample rate for this mode. Mode S timing needs exactly
    /// 2 MS/s; the audio chains run narrow, the wide spectrum wider.
    pub fn sample_rate(self) -> u32 {
        match self {
            Mode::Idle => 0,
            Mode::Spectrum => 2_400_000,
            Mode::Fm | Mode::Am | Mode::Weather => 240_000,
            Mode::Adsb => 2_000_000,
        }
    }

    /// Block size in I/Q pairs.
    pub fn block_pairs(self, fft_size: usize) -> usize {
        match self {
            Mode::Idle => 0,
            Mode::Spectrum => fft_size,
            Mode::Fm | Mode::Am | Mode::Weather => 16 * 1024,
            Mode::Adsb => 128 * 1024,
        }
    }
}

/// Downstream channels. The pipeline never blocks on a slow consumer;
/// full channels drop.
pub struct Outputs {
    pub spectrum: mpsc::Sender<Vec<f32>>,
    pub audio: mpsc::Sender<Vec<f32>>,
    pub frames: mpsc::Sender<DecodedMessage>,
}

/// Queue a block, evicting the oldest queued block if the channel is full.
/// Returns the number of blocks evicted.
fn push_drop_oldest(tx: &Sender<Vec<u8>>, rx: &Receiver<Vec<u8>>, block: Vec<u8>) -> u64 {
    let mut evicted = 0;
    let mut block = block;
    loop {
        match tx.try_send(block) {
            Ok(()) => return evicted,
            Err(TrySendError::Full(b)) => {
                if rx.try_recv().is_ok() {
                    evicted += 1;
                }
                block = b;
            }
            Err(TrySendError::Disconnected(_)) => return evicted,
        }
    }
}

/// Handle to a running acquisition thread. Joining returns the source so
/// the next mode can reconfigure it.
struct Acquisition {
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    rx: Receiver<Vec<u8>>,
    handle: JoinHandle<Box<dyn SampleSource>>,
}

impl Acquisition {
    fn start(mut source: Box<dyn SampleSource>, pairs: usize, depth: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Vec<u8>>(depth);
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let thread_stop = stop.clone();
        let thread_dropped = dropped.clone();
        let drain_rx = rx.clone();
        let handle = std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    match source.read_block(pairs) {
                        Ok(block) => {
                            let evicted = push_drop_oldest(&tx, &drain_rx, block);
                            if evicted > 0 {
                                thread_dropped.fetch_add(evicted, Ordering::Relaxed);
                                debug!("block queue full, dropped {} oldest", evicted);
                            }
                        }
                        Err(SourceError::StreamEnded) => {
                            warn!("sample stream ended");
                            break;
                        }
                        Err(e) => {
                            error!("sample read failed: {}", e);
                            break;
                        }
                    }
                }
                source
            })
            .context("failed to spawn acquisition thread")?;

        Ok(Self {
            stop,
            dropped,
            rx,
            handle,
        })
    }

    /// Stop the thread and hand the source back. Drains whatever the
    /// thread queued on its way out.
    fn shutdown(self) -> Result<Box<dyn SampleSource>> {
        self.stop.store(true, Ordering::SeqCst);
        let source = self
            .handle
            .join()
            .map_err(|_| anyhow!("acquisition thread panicked"))?;
        while self.rx.try_recv().is_ok() {}
        Ok(source)
    }
}

/// The processing core: owns the per-mode DSP state and the output
/// channels, driven by mode commands.
pub struct Pipeline {
    config: Config,
    mode: Mode,
    analyzer: SpectrumAnalyzer,
    fm: FmDiscriminator,
    am: AmDiscriminator,
    detector: FrameDetector,
    outputs: Outputs,
    blocks_processed: u64,
    frames_decoded: u64,
}

impl Pipeline {
    pub fn new(config: Config, outputs: Outputs) -> Result<Self> {
        let analyzer = SpectrumAnalyzer::new(config.fft_size)
            .with_context(|| format!("invalid FFT size {}", config.fft_size))?;
        let detector = FrameDetector::new(config.fix_errors, config.aggressive);

        Ok(Self {
            config,
            mode: Mode::Idle,
            analyzer,
            fm: FmDiscriminator::new(),
            am: AmDiscriminator::new(),
            detector,
            outputs,
            blocks_processed: 0,
            frames_decoded: 0,
        })
    }

    /// Drive the pipeline until the command channel closes. Commands are
    /// mode switches; `Mode::Idle` cancels the current session between
    /// blocks.
    pub async fn run(
        mut self,
        source: Box<dyn SampleSource>,
        mut commands: mpsc::Receiver<Mode>,
    ) -> Result<()> {
        // The source lives either here (idle) or inside the acquisition
        // thread, never both.
        let mut idle_source: Option<Box<dyn SampleSource>> = Some(source);
        let mut acquisition: Option<Acquisition> = None;
        let mut last_stats = Instant::now();
        let mut last_blocks = 0u64;

        loop {
            // Idle: nothing to poll, just wait for the next command.
            if self.mode == Mode::Idle {
                match commands.recv().await {
                    Some(mode) => {
                        acquisition =
                            self.switch_mode(mode, acquisition.take(), &mut idle_source)?;
                    }
                    None => break,
                }
                continue;
            }

            if let Ok(mode) = commands.try_recv() {
                acquisition = self.switch_mode(mode, acquisition.take(), &mut idle_source)?;
                continue;
            }

            let Some(acq) = acquisition.as_ref() else {
                self.mode = Mode::Idle;
                continue;
            };

            match acq.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(block) => self.process_block(&block),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("acquisition stopped, going idle");
                    if let Some(acq) = acquisition.take() {
                        idle_source = Some(acq.shutdown()?);
                    }
                    self.mode = Mode::Idle;
                    continue;
                }
            }

            if last_stats.elapsed() >= Duration::from_secs(5) {
                let pairs = self.mode.block_pairs(self.config.fft_size) as u64;
                let elapsed = last_stats.elapsed().as_secs_f32();
                let rate = (self.blocks_processed - last_blocks) as f32 * pairs as f32 / elapsed;
                let dropped = acquisition
                    .as_ref()
                    .map(|a| a.dropped.load(Ordering::Relaxed))
                    .unwrap_or(0);

                info!(
                    "[SDR Stats] Mode: {:?} | Rate: {:.2} MSPS | Blocks: {} (dropped: {}) | Frames: {} (repaired: {}) | CRC errors: {}",
                    self.mode,
                    rate / 1_000_000.0,
                    self.blocks_processed,
                    dropped,
                    self.detector.stats.frames_decoded,
                    self.detector.stats.repaired_frames,
                    self.detector.stats.crc_errors,
                );
                last_stats = Instant::now();
                last_blocks = self.blocks_processed;
            }
        }

        if let Some(acq) = acquisition.take() {
            acq.shutdown()?;
        }
        info!(
            "pipeline stopped after {} blocks, {} frames",
            self.blocks_processed, self.frames_decoded
        );
        Ok(())
    }

    /// Tear down the old session and configure the source for the new
    /// mode. No block is in flight while this runs.
    fn switch_mode(
        &mut self,
        mode: Mode,
        acquisition: Option<Acquisition>,
        idle_source: &mut Option<Box<dyn SampleSource>>,
    ) -> Result<Option<Acquisition>> {
        let mut source = match acquisition {
            Some(acq) => acq.shutdown()?,
            None => idle_source
                .take()
                .ok_or_else(|| anyhow!("sample source lost"))?,
        };

        info!("mode switch: {:?} -> {:?}", self.mode, mode);
        self.fm.reset();
        self.am.reset();
        self.detector = FrameDetector::new(self.config.fix_errors, self.config.aggressive);
        self.mode = mode;

        if mode == Mode::Idle {
            *idle_source = Some(source);
            return Ok(None);
        }

        source.set_sample_rate(mode.sample_rate())?;
        source.set_center_freq(self.config.frequency_hz)?;
        source.reset_buffer()?;

        let pairs = mode.block_pairs(self.config.fft_size);
        Ok(Some(Acquisition::start(
            source,
            pairs,
            self.config.queue_depth,
        )?))
    }

    fn process_block(&mut self, block: &[u8]) {
        self.blocks_processed += 1;

        match self.mode {
            Mode::Idle => {}
            Mode::Spectrum => self.send_spectrum(block),
            // Radio modes feed the analyzer too: every block yields a
            // spectrum alongside its audio.
            Mode::Fm | Mode::Weather => {
                self.send_spectrum(block);
                let audio = decimate(&self.fm.process(block), FM_DECIMATION);
                if self.outputs.audio.try_send(audio).is_err() {
                    debug!("audio channel full, dropping");
                }
            }
            Mode::Am => {
                self.send_spectrum(block);
                let audio = decimate(&self.am.process(block), AM_DECIMATION);
                if self.outputs.audio.try_send(audio).is_err() {
                    debug!("audio channel full, dropping");
                }
            }
            Mode::Adsb => {
                for mm in self.detector.process_block(block) {
                    self.frames_decoded += 1;
                    info!(
                        ">>> FRAME: DF={:02} | {} bits | ICAO={:06X} | *{};",
                        mm.df,
                        mm.bits,
                        mm.icao,
                        mm.to_hex()
                    );
                    if self.outputs.frames.try_send(mm).is_err() {
                        debug!("frame channel full, dropping frame");
                    }
                }
            }
        }
    }

    fn send_spectrum(&mut self, block: &[u8]) {
        match self.analyzer.analyze(block) {
            Ok(spectrum) => {
                if self.outputs.spectrum.try_send(spectrum).is_err() {
                    debug!("spectrum channel full, dropping");
                }
            }
            Err(e) => warn!("spectrum analysis failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("adsb"), Some(Mode::Adsb));
        assert_eq!(Mode::parse("FM"), Some(Mode::Fm));
        assert_eq!(Mode::parse("Weather"), Some(Mode::Weather));
        assert_eq!(Mode::parse("ssb"), None);
    }

    #[test]
    fn test_mode_rates_and_blocks() {
        assert_eq!(Mode::Adsb.sample_rate(), 2_000_000);
        assert_eq!(Mode::Adsb.block_pairs(2048), 128 * 1024);
        assert_eq!(Mode::Fm.sample_rate(), 240_000);
        assert_eq!(Mode::Weather.block_pairs(2048), 16 * 1024);
        assert_eq!(Mode::Spectrum.sample_rate(), 2_400_000);
        assert_eq!(Mode::Spectrum.block_pairs(2048), 2048);
    }

    #[test]
    fn test_push_drop_oldest_evicts_head() {
        let (tx, rx) = bounded::<Vec<u8>>(2);
        assert_eq!(push_drop_oldest(&tx, &rx, vec![0]), 0);
        assert_eq!(push_drop_oldest(&tx, &rx, vec![1]), 0);
        // Queue full: the oldest block makes room for the newest.
        assert_eq!(push_drop_oldest(&tx, &rx, vec![2]), 1);

        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
        assert!(rx.try_recv().is_err());
    }

    fn test_config() -> Config {
        Config {
            mode: Mode::Idle,
            frequency_hz: 1_090_000_000,
            device_index: 0,
            gain_db: 49.6,
            ppm_error: 0,
            rtl_sdr_path: "rtl_sdr".into(),
            fft_size: 64,
            queue_depth: 4,
            fix_errors: true,
            aggressive: true,
        }
    }

    fn test_pipeline() -> (
        Pipeline,
        mpsc::Receiver<Vec<f32>>,
        mpsc::Receiver<Vec<f32>>,
        mpsc::Receiver<DecodedMessage>,
    ) {
        let (spectrum_tx, spectrum_rx) = mpsc::channel(4);
        let (audio_tx, audio_rx) = mpsc::channel(4);
        let (frame_tx, frame_rx) = mpsc::channel(4);
        let pipeline = Pipeline::new(
            test_config(),
            Outputs {
                spectrum: spectrum_tx,
                audio: audio_tx,
                frames: frame_tx,
            },
        )
        .unwrap();
        (pipeline, spectrum_rx, audio_rx, frame_rx)
    }

    #[test]
    fn test_spectrum_block_produces_one_spectrum() {
        let (mut pipeline, mut spectrum_rx, _audio, _frames) = test_pipeline();
        pipeline.mode = Mode::Spectrum;

        let block = vec![200u8; 64 * 2];
        pipeline.process_block(&block);

        let spectrum = spectrum_rx.try_recv().unwrap();
        assert_eq!(spectrum.len(), 64);
    }

    #[test]
    fn test_fm_block_produces_audio_and_spectrum() {
        let (mut pipeline, mut spectrum_rx, mut audio_rx, _frames) = test_pipeline();
        pipeline.mode = Mode::Fm;

        let block = vec![140u8; 100 * 2];
        pipeline.process_block(&block);

        let audio = audio_rx.try_recv().unwrap();
        assert_eq!(audio.len(), 100 / FM_DECIMATION);
        // Radio blocks feed the analyzer as well as the discriminator.
        let spectrum = spectrum_rx.try_recv().unwrap();
        assert_eq!(spectrum.len(), 64);
    }

    #[test]
    fn test_am_block_produces_audio_and_spectrum() {
        let (mut pipeline, mut spectrum_rx, mut audio_rx, _frames) = test_pipeline();
        pipeline.mode = Mode::Am;

        let block = vec![150u8; 100 * 2];
        pipeline.process_block(&block);

        let audio = audio_rx.try_recv().unwrap();
        assert_eq!(audio.len(), 100 / AM_DECIMATION);
        let spectrum = spectrum_rx.try_recv().unwrap();
        assert_eq!(spectrum.len(), 64);
    }

    #[test]
    fn test_invalid_fft_size_is_rejected() {
        let mut config = test_config();
        config.fft_size = 1000;
        let (tx, _rx) = mpsc::channel(1);
        let (atx, _arx) = mpsc::channel(1);
        let (ftx, _frx) = mpsc::channel(1);
        assert!(Pipeline::new(
            config,
            Outputs {
                spectrum: tx,
                audio: atx,
                frames: ftx,
            },
        )
        .is_err());
    }
}
