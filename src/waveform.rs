use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

/// Bytes per curve sample requested with `DAT:WID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleWidth {
    OneByte,
    TwoByte,
}

impl SampleWidth {
    // Fast mode trades vertical resolution for half the bytes on the wire
    pub fn from_fast_mode(fast: bool) -> Self {
        if fast { SampleWidth::OneByte } else { SampleWidth::TwoByte }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleWidth::OneByte => 1,
            SampleWidth::TwoByte => 2,
        }
    }

    pub fn command_value(self) -> u8 { self.bytes_per_sample() as u8 }
}

impl Default for SampleWidth {
    fn default() -> Self { SampleWidth::TwoByte }
}

/// Decode a RIB payload: signed bytes, or signed big-endian 16-bit words.
///
/// The payload must hold a whole number of samples.
pub fn decode_samples(payload: &[u8], width: SampleWidth) -> io::Result<Vec<i16>> {
    let n = payload.len() / width.bytes_per_sample();
    if n * width.bytes_per_sample() != payload.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Payload length is not a multiple of the sample width"));
    }

    let mut rdr = Cursor::new(payload);
    let mut ans: Vec<i16> = Vec::with_capacity(n);
    for _ in 0..n {
        let raw = match width {
            SampleWidth::OneByte => rdr.read_i8()? as i16,
            SampleWidth::TwoByte => rdr.read_i16::<BigEndian>()?,
        };
        ans.push(raw);
    }

    Ok(ans)
}

/// Scale factors taken from the preamble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub y_offset: f64,
    pub y_mult: f64,
    pub x_zero: f64,
    pub x_incr: f64,
}

impl Calibration {
    pub fn voltage(&self, raw: i16) -> f64 { (raw as f64 - self.y_offset) * self.y_mult }
    pub fn time(&self, index: usize) -> f64 { self.x_zero + index as f64 * self.x_incr }
}

/// One calibrated trace. `time[i]` is the instant of `voltage[i]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waveform {
    time: Vec<f64>,
    voltage: Vec<f64>,
}

impl Waveform {
    pub fn from_samples(raw: &[i16], cal: &Calibration) -> Self {
        let voltage: Vec<f64> = raw.iter().map(|r| cal.voltage(*r)).collect();
        let time: Vec<f64> = (0..raw.len()).map(|idx| cal.time(idx)).collect();
        Self { time, voltage }
    }

    pub fn time(&self) -> &[f64] { &self.time }
    pub fn voltage(&self) -> &[f64] { &self.voltage }
    pub fn len(&self) -> usize { self.time.len() }
    pub fn is_empty(&self) -> bool { self.time.is_empty() }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time.iter().copied().zip(self.voltage.iter().copied())
    }

}
