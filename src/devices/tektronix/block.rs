
// Framing of the binary curve block returned by CURV?
//
// With headers enabled the scope answers `:CURVE #45000<5000 bytes>\r\n`: an echoed header, an IEEE 488.2
// definite-length announcement (`#`, one digit n, then n digits of byte count), the samples and a terminator.

use std::str;

use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::config::HeaderFormat;
use crate::error::{AcquisitionError, Result};

lazy_static! {
	static ref BLOCK_START_RE: Regex = Regex::new("#[0-9]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
	/// Bytes in front of the first payload byte, echoed header included
	pub header_len: usize,
	/// Announced payload size, `None` for an indefinite-length (`#0`) block
	pub declared_len: Option<usize>,
}

fn header_err(msg: String) -> AcquisitionError { AcquisitionError::BlockHeader(msg) }

pub fn parse_block_header(block: &[u8]) -> Result<BlockLayout> {
	let m = BLOCK_START_RE.find(block).ok_or_else(|| header_err("no '#' block marker".to_owned()))?;
	let ndigits = (block[m.start() + 1] - b'0') as usize;
	let digits_start = m.end();

	if ndigits == 0 {
		return Ok(BlockLayout { header_len: digits_start, declared_len: None });
	}

	let digits = block.get(digits_start..digits_start + ndigits)
		.ok_or_else(|| header_err(format!("length field cut short, expected {} digits", ndigits)))?;
	if !digits.iter().all(u8::is_ascii_digit) {
		return Err(header_err(format!("length field {:?} is not a number", String::from_utf8_lossy(digits))));
	}

	let declared_len = str::from_utf8(digits).ok()
		.and_then(|s| s.parse::<usize>().ok())
		.ok_or_else(|| header_err(format!("length field {:?} out of range", String::from_utf8_lossy(digits))))?;

	Ok(BlockLayout { header_len: digits_start + ndigits, declared_len: Some(declared_len) })
}

/// Remove the length announcement and the trailing terminator, leaving only sample bytes.
///
/// A definite-length block must carry exactly the terminator behind its announced payload.  Transports that
/// delimit messages themselves (`delimited`) may also leave it off.  A fixed header is stripped blindly and
/// any shortfall surfaces in [`fit_payload`].
pub fn strip_framing<'a>(block: &'a [u8], header: HeaderFormat, terminator: &[u8], delimited: bool) -> Result<&'a [u8]> {
	match header {
		HeaderFormat::Fixed(n) => {
			let end = block.len().saturating_sub(terminator.len());
			Ok(block.get(n..end).unwrap_or(&[]))
		},
		HeaderFormat::DefiniteLength => {
			let layout = parse_block_header(block)?;
			let body = &block[layout.header_len..];

			match layout.declared_len {
				Some(n) => match body.get(n..) {
					Some(trailer) if trailer == terminator || (delimited && trailer.is_empty()) => Ok(&body[..n]),
					trailer => {
						// Terminator bytes sitting where payload should be mean the block came up short
						let actual = body.strip_suffix(terminator).unwrap_or(body).len();
						if actual < n {
							return Err(AcquisitionError::TruncatedPayload { expected: n, actual });
						}
						Err(header_err(format!("expected {:?} after {} payload bytes, found {:?}",
							String::from_utf8_lossy(terminator), n, String::from_utf8_lossy(trailer.unwrap_or(&[])))))
					},
				},
				None => Ok(body.strip_suffix(terminator).unwrap_or(body)),
			}
		},
	}
}

/// Cut the payload down to `expected` bytes.  Extra tail bytes are dropped, a short payload is an error.
pub fn fit_payload(payload: &[u8], expected: usize) -> Result<&[u8]> {
	if payload.len() < expected {
		return Err(AcquisitionError::TruncatedPayload { expected, actual: payload.len() });
	}
	Ok(&payload[..expected])
}

/// Whether a block collected from a byte stream can be complete yet.
pub fn block_complete(buf: &[u8], header: HeaderFormat, terminator: &[u8]) -> bool {
	match header {
		HeaderFormat::Fixed(n) => buf.len() >= n + terminator.len() && buf.ends_with(terminator),
		HeaderFormat::DefiniteLength => match parse_block_header(buf) {
			Ok(BlockLayout { header_len, declared_len: Some(n) }) => buf.len() >= header_len + n + terminator.len(),
			Ok(BlockLayout { declared_len: None, .. }) => buf.ends_with(terminator),
			Err(_) => false,
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const TERM: &[u8] = b"\r\n";

	fn curve_block(payload: &[u8]) -> Vec<u8> {
		let mut block = format!(":CURVE #{}{}", payload.len().to_string().len(), payload.len()).into_bytes();
		block.extend_from_slice(payload);
		block.extend_from_slice(TERM);
		block
	}

	#[test]
	fn echoed_header_is_skipped() {
		let block = curve_block(&[7u8; 5000]);
		let layout = parse_block_header(&block).unwrap();

		// ":CURVE " + "#4" + "5000", the 13 bytes the legacy serial driver threw away
		assert_eq!(layout, BlockLayout { header_len: 13, declared_len: Some(5000) });
		assert_eq!(strip_framing(&block, HeaderFormat::DefiniteLength, TERM, false).unwrap().len(), 5000);
	}

	#[test]
	fn fixed_header_strips_header_and_terminator() {
		let block = vec![0u8; 13 + 2500 + 2];
		let payload = strip_framing(&block, HeaderFormat::Fixed(13), TERM, false).unwrap();
		assert_eq!(payload.len(), block.len() - 15);
	}

	#[test]
	fn fixed_header_block_one_byte_short_is_truncated() {
		let block = vec![0u8; 13 + 2499 + 2];
		let payload = strip_framing(&block, HeaderFormat::Fixed(13), TERM, false).unwrap();

		match fit_payload(payload, 2500) {
			Err(AcquisitionError::TruncatedPayload { expected: 2500, actual: 2499 }) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn fixed_header_longer_than_block_yields_nothing() {
		assert!(strip_framing(b"#4", HeaderFormat::Fixed(13), TERM, false).unwrap().is_empty());
	}

	#[test]
	fn block_shorter_than_announced_is_truncated() {
		let mut block = b"#41000".to_vec();
		block.extend_from_slice(&[1u8; 999]);
		block.extend_from_slice(TERM);

		match strip_framing(&block, HeaderFormat::DefiniteLength, TERM, false) {
			Err(AcquisitionError::TruncatedPayload { expected: 1000, actual: 999 }) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn longer_payload_is_cut_to_size() {
		let payload = [1u8, 2, 3, 4, 5];
		assert_eq!(fit_payload(&payload, 3).unwrap(), &[1, 2, 3]);
	}

	#[test]
	fn indefinite_block_runs_to_the_terminator() {
		let payload = strip_framing(b"#0abc\r\n", HeaderFormat::DefiniteLength, TERM, false).unwrap();
		assert_eq!(payload, b"abc");
	}

	#[test]
	fn malformed_headers_are_rejected() {
		assert!(matches!(parse_block_header(b"CURVE 1,2,3"), Err(AcquisitionError::BlockHeader(_))));
		assert!(matches!(parse_block_header(b"#45"), Err(AcquisitionError::BlockHeader(_))));
		assert!(matches!(parse_block_header(b"#2x1"), Err(AcquisitionError::BlockHeader(_))));
	}

	#[test]
	fn payload_bytes_that_look_like_a_terminator_do_not_end_the_block() {
		let mut partial = b"#210".to_vec();
		partial.extend_from_slice(b"ab\r\n");
		assert!(!block_complete(&partial, HeaderFormat::DefiniteLength, TERM));

		partial.extend_from_slice(b"cdefgh\r\n");
		assert!(block_complete(&partial, HeaderFormat::DefiniteLength, TERM));
	}

	#[test]
	fn fixed_block_completes_on_terminator() {
		assert!(!block_complete(b"0123456789abc\r\n", HeaderFormat::Fixed(14), TERM));
		assert!(block_complete(b"0123456789abcXY\r\n", HeaderFormat::Fixed(13), TERM));
		assert!(!block_complete(b"0123456789abcXY", HeaderFormat::Fixed(13), TERM));
	}

	#[test]
	fn last_sample_byte_may_look_like_a_terminator() {
		let mut payload = vec![0x0Cu8; 5000];
		payload[4999] = 0x0D;

		let mut block = b"#45000".to_vec();
		block.extend_from_slice(&payload);
		block.push(b'\n');
		assert_eq!(strip_framing(&block, HeaderFormat::DefiniteLength, b"\n", false).unwrap(), &payload[..]);

		let block = curve_block(&payload);
		assert_eq!(strip_framing(&block, HeaderFormat::DefiniteLength, TERM, false).unwrap(), &payload[..]);
	}

	#[test]
	fn delimited_block_may_omit_the_terminator() {
		let mut payload = vec![0u8; 5000];
		payload[4998..].copy_from_slice(TERM);

		let mut block = b"#45000".to_vec();
		block.extend_from_slice(&payload);
		assert_eq!(strip_framing(&block, HeaderFormat::DefiniteLength, TERM, true).unwrap(), &payload[..]);

		// On a byte stream the same bytes are a block two bytes short
		match strip_framing(&block, HeaderFormat::DefiniteLength, TERM, false) {
			Err(AcquisitionError::TruncatedPayload { expected: 5000, actual: 4998 }) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn foreign_trailer_is_a_framing_error() {
		let mut block = b"#13abc".to_vec();
		block.extend_from_slice(b"XY");
		assert!(matches!(strip_framing(&block, HeaderFormat::DefiniteLength, TERM, true), Err(AcquisitionError::BlockHeader(_))));
	}
}
