use std::collections::BTreeMap;

use crate::error::{AcquisitionError, Result};
use crate::waveform::Calibration;

pub const REQUIRED_FIELDS: [&str; 4] = ["YOFF", "YMULT", "XZERO", "XINCR"];

/// Waveform preamble returned by `WFMPRe?`.
///
/// Numeric fields are kept as numbers; the handful of textual ones (`ENCDG BIN`, `BN_FMT RI`, the quoted
/// `WFID`) are kept verbatim so nothing the scope reported is lost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preamble {
	values: BTreeMap<String, f64>,
	text: BTreeMap<String, String>,
}

// `WFMPRE:YOFF`, `:WFMPRE:YOFF` and `yoff` all name the same field
fn field_key(name: &str) -> String {
	name.rsplit(':').next().unwrap_or(name).trim().to_ascii_uppercase()
}

fn parse_err(msg: String) -> AcquisitionError { AcquisitionError::PreambleParse(msg) }

impl Preamble {

	/// Parse a raw response.  Its first character is a status echo and is dropped.
	pub fn parse(response: &str) -> Result<Self> {
		let mut chars = response.chars();
		if chars.next().is_none() {
			return Err(parse_err("empty response".to_owned()));
		}
		Self::parse_fields(chars.as_str())
	}

	/// Parse `NAME value;NAME value;...`.
	pub fn parse_fields(fields: &str) -> Result<Self> {
		let mut ans = Preamble::default();

		for field in fields.trim_end_matches(|c| c == '\r' || c == '\n').split(';') {
			let field = field.trim();
			if field.is_empty() {
				continue;
			}

			let (name, value) = field.split_once(' ')
				.ok_or_else(|| parse_err(format!("field {:?} has no value", field)))?;
			let key = field_key(name);
			if key.is_empty() {
				return Err(parse_err(format!("field {:?} has no name", field)));
			}

			let value = value.trim();
			match value.parse::<f64>() {
				Ok(x) => {
					ans.text.remove(&key);
					ans.values.insert(key, x);
				},
				Err(_) => {
					ans.values.remove(&key);
					ans.text.insert(key, value.trim_matches('"').to_owned());
				},
			}
		}

		Ok(ans)
	}

	pub fn get(&self, name: &str) -> Option<f64> { self.values.get(&field_key(name)).copied() }
	pub fn text(&self, name: &str) -> Option<&str> { self.text.get(&field_key(name)).map(String::as_str) }

	pub fn len(&self) -> usize { self.values.len() + self.text.len() }
	pub fn is_empty(&self) -> bool { self.len() == 0 }

	pub fn numeric(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
		self.values.iter().map(|(k, v)| (k.as_str(), *v))
	}

	pub fn textual(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
		self.text.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn require(&self, name: &str) -> Result<f64> {
		match (self.get(name), self.text(name)) {
			(Some(x), _) if x.is_finite() => Ok(x),
			(Some(x), _) => Err(parse_err(format!("{} is not finite ({})", name, x))),
			(None, Some(t)) => Err(parse_err(format!("{} is not numeric ({:?})", name, t))),
			(None, None) => Err(parse_err(format!("missing required field {}", name))),
		}
	}

	pub fn calibration(&self) -> Result<Calibration> {
		Ok(Calibration {
			y_offset: self.require("YOFF")?,
			y_mult: self.require("YMULT")?,
			x_zero: self.require("XZERO")?,
			x_incr: self.require("XINCR")?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn four_required_fields() {
		let p = Preamble::parse(":YOFF 0.0;YMULT 0.04;XZERO -1.25;XINCR 0.001").unwrap();

		assert_eq!(p.len(), 4);
		assert_eq!(p.numeric().count(), 4);
		assert_eq!(p.get("YOFF"), Some(0.0));
		assert_eq!(p.get("YMULT"), Some(0.04));
		assert_eq!(p.get("XZERO"), Some(-1.25));
		assert_eq!(p.get("XINCR"), Some(0.001));
	}

	#[test]
	fn field_without_value_is_rejected() {
		match Preamble::parse(":YOFF;YMULT 0.04") {
			Err(AcquisitionError::PreambleParse(msg)) => assert!(msg.contains("YOFF")),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn full_scope_response_with_headers() {
		let resp = ":WFMPRE:BYT_NR 2;BIT_NR 16;ENCDG BIN;BN_FMT RI;BYT_OR MSB;NR_PT 2500;\
					WFID \"Ch1, DC coupling, 2.0E0 V/div, 5.0E-4 s/div, 2500 points, Sample mode\";\
					PT_FMT Y;XINCR 2.0E-6;PT_OFF 0;XZERO -2.5E-3;XUNIT \"s\";YMULT 3.125E-4;\
					YZERO 0.0E0;YOFF 0.0E0;YUNIT \"Volts\"\r\n";
		let p = Preamble::parse(resp).unwrap();

		assert_eq!(p.get("BYT_NR"), Some(2.0));
		assert_eq!(p.text("ENCDG"), Some("BIN"));
		assert_eq!(p.text("WFID"), Some("Ch1, DC coupling, 2.0E0 V/div, 5.0E-4 s/div, 2500 points, Sample mode"));
		assert_eq!(p.text("yunit"), Some("Volts"));

		let cal = p.calibration().unwrap();
		assert_eq!(cal.x_incr, 2.0e-6);
		assert_eq!(cal.x_zero, -2.5e-3);
		assert_eq!(cal.y_mult, 3.125e-4);
	}

	#[test]
	fn missing_required_field_fails_calibration() {
		let p = Preamble::parse(":YOFF 0;YMULT 0.04;XZERO 0").unwrap();
		match p.calibration() {
			Err(AcquisitionError::PreambleParse(msg)) => assert_eq!(msg, "missing required field XINCR"),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn textual_required_field_fails_calibration() {
		let p = Preamble::parse(":YOFF 0;YMULT volts;XZERO 0;XINCR 1").unwrap();
		assert!(p.calibration().is_err());
	}

	#[test]
	fn empty_response_is_rejected() {
		assert!(Preamble::parse("").is_err());
	}

	#[test]
	fn trailing_separator_is_ignored() {
		let p = Preamble::parse(":YOFF 1;").unwrap();
		assert_eq!(p.len(), 1);
	}
}
