use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, Result};
use crate::waveform::SampleWidth;

pub const DEFAULT_CHANNEL: &str       = "CH1";
pub const DEFAULT_TRACE_LENGTH: usize = 2500;
pub const DEFAULT_TIMEOUT_MS: u64     = 6000;
pub const DEFAULT_POLL_MS: u64        = 100;
pub const DEFAULT_TERMINATOR: &str    = "\r\n";

/// How the binary length announcement in front of the curve data is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderFormat {
    /// IEEE 488.2 definite-length block, `#<n><n digits>`, optionally preceded by an echoed header
    DefiniteLength,
    /// Strip a fixed number of leading bytes
    Fixed(usize),
}

impl Default for HeaderFormat {
    fn default() -> Self { HeaderFormat::DefiniteLength }
}

/// How the curve block is pulled off the channel after `CURV?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Native block read when the channel supports it, polling otherwise
    Auto,
    Block,
    Polled,
    Counted,
}

impl Default for TransferMode {
    fn default() -> Self { TransferMode::Auto }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub channel: String,
    pub sample_width: SampleWidth,
    pub trace_length: usize,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub header: HeaderFormat,
    pub terminator: String,
    pub transfer: TransferMode,
    pub release_after_acquire: bool,
    pub debug: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_owned(),
            sample_width: SampleWidth::TwoByte,
            trace_length: DEFAULT_TRACE_LENGTH,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_MS,
            header: HeaderFormat::DefiniteLength,
            terminator: DEFAULT_TERMINATOR.to_owned(),
            transfer: TransferMode::Auto,
            release_after_acquire: true,
            debug: false,
        }
    }
}

impl AcquisitionConfig {

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| AcquisitionError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| AcquisitionError::Config(format!("unable to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn fast_mode(mut self, fast: bool) -> Self {
        self.sample_width = SampleWidth::from_fast_mode(fast);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let channel = self.channel.trim();
        if channel.is_empty() || channel.contains(char::is_whitespace) {
            return Err(AcquisitionError::Config(format!("invalid source channel {:?}", self.channel)));
        }
        if self.trace_length == 0 {
            return Err(AcquisitionError::Config("trace_length must be positive".to_owned()));
        }
        if self.timeout_ms == 0 {
            return Err(AcquisitionError::Config("timeout_ms must be positive".to_owned()));
        }
        if self.terminator.is_empty() {
            return Err(AcquisitionError::Config("terminator must not be empty".to_owned()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
    pub fn terminator_bytes(&self) -> &[u8] { self.terminator.as_bytes() }

    pub fn expected_payload_len(&self) -> usize {
        self.trace_length * self.sample_width.bytes_per_sample()
    }
}
