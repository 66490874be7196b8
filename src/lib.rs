
// Error type shared by every layer that can abort an acquisition
pub mod error;

// Acquisition settings, loadable from JSON
pub mod config;

// Sample decoding, calibration and the resulting trace
pub mod waveform;

// Byte-stream links to instruments: serial, loopback, and the trait they share
pub mod channel;

// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments like oscilloscopes over a LAN
pub mod vxi11;

// Instrument drivers
pub mod devices;

pub use channel::{InstrumentChannel, LoopbackChannel};
pub use config::{AcquisitionConfig, HeaderFormat, TransferMode};
pub use devices::tektronix::WaveformAcquirer;
pub use error::{AcquisitionError, Result};
pub use waveform::{SampleWidth, Waveform};
