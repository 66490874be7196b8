
// Tektronix TDS-style oscilloscopes: waveform transfer with the DATa / WFMPRe / CURVe command groups

use std::io::{self, Error, ErrorKind};
use std::sync::{Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::channel::{timed_out, InstrumentChannel};
use crate::config::{AcquisitionConfig, HeaderFormat, TransferMode};
use crate::error::{AcquisitionError, Result};
use crate::waveform::{decode_samples, Waveform};

pub mod block;
pub mod preamble;

use block::{block_complete, fit_payload, parse_block_header, strip_framing};
use preamble::Preamble;

lazy_static! {
	static ref IDN_RE: Regex = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\r\\n]+)").unwrap();
}

pub const PREAMBLE_QUERY: &str = "WFMPRe?";
pub const CURVE_QUERY: &str    = "CURV?";
pub const IDN_QUERY: &str      = "*IDN?";

// Counted transfers give up looking for the '#' marker after this many bytes
const MAX_BLOCK_PREFIX: usize = 64;

fn transport(step: &str) -> impl FnOnce(io::Error) -> AcquisitionError + '_ {
	move |e| AcquisitionError::transport(step, e)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

impl Identity {
	pub fn parse(resp: &str) -> Option<Self> {
		let caps = IDN_RE.captures(resp.trim())?;
		let field = |i: usize| caps.get(i).map(|m| m.as_str().trim().to_owned());
		Some(Identity { manufacturer: field(1)?, model: field(2)?, serial_num: field(3)?, fw_version: field(4)? })
	}
}

/// Ask the instrument who it is.
pub fn identify<C: InstrumentChannel + ?Sized>(channel: &mut C, terminator: &[u8], timeout: Duration) -> Result<Identity> {
	if !channel.is_open() {
		channel.open().map_err(transport("open"))?;
	}
	channel.write(IDN_QUERY).map_err(transport(IDN_QUERY))?;
	let resp = channel.read_line(terminator, timeout).map_err(transport(IDN_QUERY))?;

	Identity::parse(&resp).ok_or_else(|| {
		AcquisitionError::transport(IDN_QUERY, Error::new(ErrorKind::InvalidData, format!("unrecognised identification {:?}", resp)))
	})
}

/// Runs the waveform transfer protocol against whatever channel it is handed.
///
/// The acquirer holds nothing but its configuration, so one instance can serve any number of channels, one
/// transaction at a time per channel.
#[derive(Debug, Clone)]
pub struct WaveformAcquirer {
	config: AcquisitionConfig,
}

impl WaveformAcquirer {

	pub fn new(config: AcquisitionConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self { config })
	}

	pub fn config(&self) -> &AcquisitionConfig { &self.config }

	/// Acquire one trace.  On failure the channel is closed on a best-effort basis and the original error is
	/// returned; on success it is closed only when `release_after_acquire` is set.
	pub fn acquire<C: InstrumentChannel + ?Sized>(&self, channel: &mut C) -> Result<Waveform> {
		if !channel.is_open() {
			channel.open().map_err(transport("open"))?;
		}

		match self.transaction(channel) {
			Ok(wf) => {
				if self.config.release_after_acquire {
					channel.close().map_err(AcquisitionError::Close)?;
				}
				Ok(wf)
			},
			Err(e) => {
				if let Err(close_err) = channel.close() {
					warn!("Unable to close channel after failed acquisition ({}): {}", e, close_err);
				}
				Err(e)
			},
		}
	}

	/// Same as [`acquire`](Self::acquire) for a channel shared between threads.  Fails with `ChannelBusy`
	/// instead of waiting when another acquisition holds the channel.
	pub fn acquire_shared<C: InstrumentChannel + ?Sized>(&self, channel: &Mutex<C>) -> Result<Waveform> {
		let mut guard = match channel.try_lock() {
			Ok(guard) => guard,
			// A poisoned lock means a transaction died halfway, leaving the instrument mid-transfer
			Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => return Err(AcquisitionError::ChannelBusy),
		};
		self.acquire(&mut *guard)
	}

	fn send<C: InstrumentChannel + ?Sized>(&self, channel: &mut C, command: &str) -> Result<()> {
		debug!("-> {}", command);
		channel.write(command).map_err(transport(command))
	}

	fn transaction<C: InstrumentChannel + ?Sized>(&self, channel: &mut C) -> Result<Waveform> {
		let cfg = &self.config;

		self.send(channel, &format!("DAT:SOU {}", cfg.channel))?;
		self.send(channel, "DAT:ENC RIB")?;
		self.send(channel, &format!("DAT:WID {}", cfg.sample_width.command_value()))?;
		self.send(channel, "DAT:STAR 1")?;
		self.send(channel, &format!("DAT:STOP {}", cfg.trace_length))?;

		self.send(channel, PREAMBLE_QUERY)?;
		let resp = channel.read_line(cfg.terminator_bytes(), cfg.timeout()).map_err(transport(PREAMBLE_QUERY))?;
		if cfg.debug { info!("Preamble: {}", resp); }

		let preamble = Preamble::parse(&resp)?;
		if cfg.debug {
			for (name, value) in preamble.numeric() { info!("{}\t{}", name, value); }
			for (name, value) in preamble.textual() { info!("{}\t{}", name, value); }
		}
		if let Some(n) = preamble.get("BYT_NR") {
			if n as usize != cfg.sample_width.bytes_per_sample() {
				warn!("Scope reports {} bytes per sample but {} were requested", n, cfg.sample_width.bytes_per_sample());
			}
		}
		let cal = preamble.calibration()?;

		self.send(channel, CURVE_QUERY)?;
		let t0 = Instant::now();
		let (raw, delimited) = self.read_curve(channel)?;
		if cfg.debug { info!("Reading took {:.3} sec ({} bytes)", t0.elapsed().as_secs_f64(), raw.len()); }

		let expected = cfg.expected_payload_len();
		let payload = strip_framing(&raw, cfg.header, cfg.terminator_bytes(), delimited)?;
		if payload.len() > expected {
			debug!("Dropping {} bytes past the requested {} samples", payload.len() - expected, cfg.trace_length);
		}
		let payload = fit_payload(payload, expected)?;

		let samples = decode_samples(payload, cfg.sample_width)
			.map_err(|_| AcquisitionError::TruncatedPayload { expected, actual: payload.len() })?;
		let wf = Waveform::from_samples(&samples, &cal);
		if cfg.debug { info!("x:{} y:{}", wf.time().len(), wf.voltage().len()); }

		Ok(wf)
	}

	// The flag tells whether the transport delimited the block itself, so its terminator may be missing
	fn read_curve<C: InstrumentChannel + ?Sized>(&self, channel: &mut C) -> Result<(Vec<u8>, bool)> {
		let timeout = self.config.timeout();

		match self.config.transfer {
			TransferMode::Auto | TransferMode::Block => {
				match channel.read_raw_block(timeout).map_err(transport(CURVE_QUERY))? {
					Some(block) => Ok((block, true)),
					None if self.config.transfer == TransferMode::Auto => Ok((self.poll_curve(channel)?, false)),
					None => Err(AcquisitionError::transport(CURVE_QUERY, Error::new(ErrorKind::Unsupported, "channel has no native block read"))),
				}
			},
			TransferMode::Polled => Ok((self.poll_curve(channel)?, false)),
			TransferMode::Counted => Ok((self.count_curve(channel)?, false)),
		}
	}

	// Stream transports: keep collecting until nothing is waiting and the block looks whole
	fn poll_curve<C: InstrumentChannel + ?Sized>(&self, channel: &mut C) -> Result<Vec<u8>> {
		let cfg = &self.config;
		let term = cfg.terminator_bytes();
		let start = Instant::now();
		let mut block: Vec<u8> = vec![];

		loop {
			let chunk = channel.read_available().map_err(transport(CURVE_QUERY))?;
			let expired = start.elapsed() >= cfg.timeout();

			if !chunk.is_empty() {
				block.extend_from_slice(&chunk);
				if expired {
					return Err(AcquisitionError::transport(CURVE_QUERY, timed_out("Curve block", cfg.timeout())));
				}
				continue;
			}

			if block_complete(&block, cfg.header, term) {
				return Ok(block);
			}
			if expired {
				// Something terminated arrived; let the framing checks say what is wrong with it
				if !block.is_empty() && block.ends_with(term) {
					return Ok(block);
				}
				return Err(AcquisitionError::transport(CURVE_QUERY, timed_out("Curve block", cfg.timeout())));
			}
			thread::sleep(cfg.poll_interval());
		}
	}

	// Read header, payload and terminator with exact-length reads, as a counted serial transfer does
	fn count_curve<C: InstrumentChannel + ?Sized>(&self, channel: &mut C) -> Result<Vec<u8>> {
		let cfg = &self.config;
		let start = Instant::now();
		let timeout = cfg.timeout();
		let term_len = cfg.terminator_bytes().len();
		let mut block: Vec<u8> = vec![];

		match cfg.header {
			HeaderFormat::Fixed(n) => {
				block.extend(read_counted(channel, n, start, timeout)?);
				block.extend(read_counted(channel, cfg.expected_payload_len(), start, timeout)?);
			},
			HeaderFormat::DefiniteLength => {
				loop {
					let b = read_counted(channel, 1, start, timeout)?;
					block.extend_from_slice(&b);
					if b.first() == Some(&b'#') { break; }
					if block.len() >= MAX_BLOCK_PREFIX {
						return Err(AcquisitionError::BlockHeader(format!("no '#' block marker within {} bytes", MAX_BLOCK_PREFIX)));
					}
				}

				let digit = read_counted(channel, 1, start, timeout)?;
				block.extend_from_slice(&digit);
				let ndigits = match digit.first() {
					Some(d @ b'1'..=b'9') => (d - b'0') as usize,
					Some(b'0') => return Err(AcquisitionError::BlockHeader("indefinite-length block needs a polled transfer".to_owned())),
					_ => return Err(AcquisitionError::BlockHeader(format!("bad digit count {:?}", String::from_utf8_lossy(&digit)))),
				};

				block.extend(read_counted(channel, ndigits, start, timeout)?);
				let declared = parse_block_header(&block)?.declared_len.unwrap_or(0);
				block.extend(read_counted(channel, declared, start, timeout)?);
			},
		}

		block.extend(read_counted(channel, term_len, start, timeout)?);
		Ok(block)
	}
}

fn read_counted<C: InstrumentChannel + ?Sized>(channel: &mut C, n: usize, start: Instant, timeout: Duration) -> Result<Vec<u8>> {
	let remaining = timeout.checked_sub(start.elapsed()).filter(|d| !d.is_zero())
		.ok_or_else(|| AcquisitionError::transport(CURVE_QUERY, timed_out("Curve block", timeout)))?;
	channel.read_exact(n, remaining).map_err(transport(CURVE_QUERY))
}
