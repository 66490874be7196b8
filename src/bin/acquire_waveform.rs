use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use scopewave::channel::InstrumentChannel;
use scopewave::devices::tektronix::{identify, WaveformAcquirer};
use scopewave::config::DEFAULT_TERMINATOR;
use scopewave::vxi11::{Vxi11Channel, MESSAGE_TERMINATOR};
use scopewave::{AcquisitionConfig, Waveform};

/// Pull one calibrated trace off a Tektronix oscilloscope.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
	/// Serial port the scope is attached to, e.g. /dev/ttyUSB0 or COM1
	#[arg(long, conflicts_with = "host")]
	serial: Option<String>,

	#[arg(long, default_value_t = 9600)]
	baud: u32,

	/// Address of a VXI-11 (LAN/GPIB gateway) instrument
	#[arg(long)]
	host: Option<String>,

	/// JSON acquisition settings; command line options override them
	#[arg(long)]
	config: Option<PathBuf>,

	#[arg(long)]
	channel: Option<String>,

	/// One byte per sample: faster, coarser
	#[arg(long)]
	fast: bool,

	#[arg(long)]
	points: Option<usize>,

	#[arg(long)]
	timeout_ms: Option<u64>,

	/// Print the instrument identification before acquiring
	#[arg(long)]
	identify: bool,

	#[arg(long)]
	debug: bool,

	/// Write the waveform as JSON here instead of printing a summary
	#[arg(short, long)]
	output: Option<PathBuf>,
}

fn open_channel(args: &Args) -> Result<Box<dyn InstrumentChannel>, Box<dyn Error>> {
	if let Some(host) = &args.host {
		return Ok(Box::new(Vxi11Channel::new(host)));
	}

	match &args.serial {
		#[cfg(feature = "serial")]
		Some(port) => Ok(Box::new(scopewave::channel::SerialChannel::new(port, args.baud))),
		#[cfg(not(feature = "serial"))]
		Some(_) => Err("serial support not enabled, rebuild with --features serial".into()),
		None => Err("one of --serial or --host is required".into()),
	}
}

fn summarize(wf: &Waveform) {
	let (t, v) = (wf.time(), wf.voltage());
	let vmin = v.iter().copied().fold(f64::INFINITY, f64::min);
	let vmax = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
	println!("{} points", wf.len());
	if let (Some(t0), Some(t1)) = (t.first(), t.last()) {
		println!("t: {:.6e} .. {:.6e} s", t0, t1);
		println!("v: {:.6e} .. {:.6e} V", vmin, vmax);
	}
}

fn main() -> Result<(), Box<dyn Error>> {
	let args = Args::parse();

	let level = if args.debug { "debug" } else { "info" };
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

	let mut config = match &args.config {
		Some(path) => AcquisitionConfig::from_json_file(path)?,
		None => AcquisitionConfig::default(),
	};
	if let Some(channel) = &args.channel { config.channel = channel.clone(); }
	if let Some(points) = args.points { config.trace_length = points; }
	if let Some(timeout_ms) = args.timeout_ms { config.timeout_ms = timeout_ms; }
	if args.fast { config = config.fast_mode(true); }
	config.debug |= args.debug;
	if args.host.is_some() && config.terminator == DEFAULT_TERMINATOR {
		config.terminator = MESSAGE_TERMINATOR.to_owned();
	}

	let acquirer = WaveformAcquirer::new(config)?;
	let mut channel = open_channel(&args)?;

	if args.identify {
		let cfg = acquirer.config();
		let idn = identify(&mut channel, cfg.terminator_bytes(), cfg.timeout())?;
		info!("{} {} (serial {}, firmware {})", idn.manufacturer, idn.model, idn.serial_num, idn.fw_version);
	}

	let wf = acquirer.acquire(&mut channel)?;

	match &args.output {
		Some(path) => {
			fs::write(path, serde_json::to_string_pretty(&wf)?)?;
			info!("Wrote {} points to {}", wf.len(), path.display());
		},
		None => summarize(&wf),
	}

	Ok(())
}
