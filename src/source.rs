//! Sample acquisition boundary.
//!
//! The pipeline pulls raw interleaved I/Q bytes through the `SampleSource`
//! trait from a dedicated acquisition thread. The stock implementation
//! spawns the `rtl_sdr` capture tool and reads its stdout; retuning or a
//! sample-rate change restarts the subprocess, since the tool takes both
//! only on its command line.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sample stream ended")]
    StreamEnded,
    #[error("sample read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking byte source for the acquisition thread. One read returns one
/// full block; partial blocks are an error, not a short read.
pub trait SampleSource: Send {
    /// Read exactly `pairs` interleaved I/Q byte pairs.
    fn read_block(&mut self, pairs: usize) -> Result<Vec<u8>, SourceError>;

    fn set_sample_rate(&mut self, rate: u32) -> Result<(), SourceError>;

    fn set_center_freq(&mut self, freq_hz: u32) -> Result<(), SourceError>;

    /// Discard any samples buffered before the current configuration.
    fn reset_buffer(&mut self) -> Result<(), SourceError>;
}

/// `rtl_sdr` subprocess wrapper. The child is started lazily on the first
/// read after (re)configuration.
pub struct RtlSdrSource {
    path: PathBuf,
    device_index: u32,
    gain_db: f32,
    ppm_error: i32,
    sample_rate: u32,
    center_freq: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
}

impl RtlSdrSource {
    pub fn new(path: PathBuf, device_index: u32, gain_db: f32, ppm_error: i32) -> Self {
        Self {
            path,
            device_index,
            gain_db,
            ppm_error,
            sample_rate: 2_000_000,
            center_freq: 1_090_000_000,
            child: None,
            stdout: None,
        }
    }

    fn start(&mut self) -> Result<(), SourceError> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("-d")
            .arg(self.device_index.to_string())
            .arg("-f")
            .arg(self.center_freq.to_string())
            .arg("-s")
            .arg(self.sample_rate.to_string())
            .arg("-g")
            .arg(self.gain_db.to_string());
        if self.ppm_error != 0 {
            cmd.arg("-p").arg(self.ppm_error.to_string());
        }
        cmd.arg("-").stdout(Stdio::piped()).stderr(Stdio::piped());

        info!(
            "starting rtl_sdr: device={} freq={} Hz rate={} S/s gain={} dB",
            self.device_index, self.center_freq, self.sample_rate, self.gain_db
        );

        let mut child = cmd.spawn().map_err(|e| SourceError::Spawn {
            path: self.path.to_string_lossy().into_owned(),
            source: e,
        })?;

        // Relay the tool's diagnostics into our log.
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                let mut reader = std::io::BufReader::new(stderr);
                let mut line = String::new();
                while std::io::BufRead::read_line(&mut reader, &mut line).unwrap_or(0) > 0 {
                    if !line.trim().is_empty() {
                        info!("[rtl_sdr] {}", line.trim());
                    }
                    line.clear();
                }
            });
        }

        self.stdout = child.stdout.take();
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if child.kill().is_err() {
                warn!("rtl_sdr already exited");
            }
            let _ = child.wait();
        }
    }
}

impl SampleSource for RtlSdrSource {
    fn read_block(&mut self, pairs: usize) -> Result<Vec<u8>, SourceError> {
        if self.stdout.is_none() {
            self.start()?;
        }
        let stdout = self.stdout.as_mut().ok_or(SourceError::StreamEnded)?;

        let mut block = vec![0u8; pairs * 2];
        match stdout.read_exact(&mut block) {
            Ok(()) => Ok(block),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.stop();
                Err(SourceError::StreamEnded)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<(), SourceError> {
        if rate != self.sample_rate {
            self.sample_rate = rate;
            self.stop();
        }
        Ok(())
    }

    fn set_center_freq(&mut self, freq_hz: u32) -> Result<(), SourceError> {
        if freq_hz != self.center_freq {
            self.center_freq = freq_hz;
            self.stop();
        }
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<(), SourceError> {
        // Anything buffered belongs to the previous tuning.
        self.stop();
        Ok(())
    }
}

impl Drop for RtlSdrSource {
    fn drop(&mut self) {
        self.stop();
    }
}
