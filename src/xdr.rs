
// External data representation (RFC 4506).  Everything is big-endian and padded to four-byte boundaries.

use std::io::{self, Cursor, Error, ErrorKind, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

#[derive(Default)]
pub struct Packer {
	buf: Vec<u8>,
}

impl Packer {

	pub fn new() -> Self { Self::default() }

	pub fn as_bytes(&self) -> &[u8] { &self.buf }

	pub fn pack_u32(&mut self, x:u32) -> io::Result<()> { self.buf.write_u32::<BigEndian>(x) }
	pub fn pack_i32(&mut self, x:i32) -> io::Result<()> { self.buf.write_i32::<BigEndian>(x) }
	pub fn pack_bool(&mut self, b:bool) -> io::Result<()> { self.pack_i32(b as i32) }

	pub fn pack_opaque(&mut self, data:&[u8]) -> io::Result<()> {
		let n = u32::try_from(data.len()).map_err(|_| Error::new(ErrorKind::InvalidInput, "Opaque data too long for XDR"))?;
		self.pack_u32(n)?;
		self.buf.extend_from_slice(data);
		while self.buf.len() % 4 != 0 { self.buf.push(0); }
		Ok(())
	}

	pub fn pack_string(&mut self, s:&str) -> io::Result<()> { self.pack_opaque(s.as_bytes()) }
}

pub struct Unpacker {
	rdr: Cursor<Vec<u8>>,
}

impl Unpacker {

	pub fn new(data:Vec<u8>) -> Self { Self{ rdr: Cursor::new(data) } }

	pub fn remaining(&self) -> usize { self.rdr.get_ref().len().saturating_sub(self.rdr.position() as usize) }
	pub fn all_data_consumed(&self) -> bool { self.remaining() == 0 }

	pub fn unpack_u32(&mut self) -> io::Result<u32> { self.rdr.read_u32::<BigEndian>() }
	pub fn unpack_i32(&mut self) -> io::Result<i32> { self.rdr.read_i32::<BigEndian>() }

	pub fn unpack_bool(&mut self) -> io::Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			x => Err(Error::new(ErrorKind::InvalidData, format!("Expected 0 or 1 for an XDR bool but got {}", x))),
		}
	}

	pub fn unpack_opaque(&mut self) -> io::Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		if n > self.remaining() {
			return Err(Error::new(ErrorKind::UnexpectedEof, "Opaque data runs past the end of the message"));
		}

		let mut ans = vec![0u8; n];
		self.rdr.read_exact(&mut ans)?;

		// Skip the alignment padding, which may be missing at the very end
		let pad = (4 - n % 4) % 4;
		let new_pos = self.rdr.position() + pad.min(self.remaining()) as u64;
		self.rdr.set_position(new_pos);
		Ok(ans)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opaque_is_length_prefixed_and_padded() {
		let mut p = Packer::new();
		p.pack_opaque(b"inst0").unwrap();
		assert_eq!(p.as_bytes(), &[0, 0, 0, 5, b'i', b'n', b's', b't', b'0', 0, 0, 0]);
	}

	#[test]
	fn values_survive_packing() {
		let mut p = Packer::new();
		p.pack_i32(-7).unwrap();
		p.pack_bool(true).unwrap();
		p.pack_string("CURV?").unwrap();
		p.pack_u32(0x0607af).unwrap();

		let mut u = Unpacker::new(p.as_bytes().to_vec());
		assert_eq!(u.unpack_i32().unwrap(), -7);
		assert!(u.unpack_bool().unwrap());
		assert_eq!(u.unpack_opaque().unwrap(), b"CURV?".to_vec());
		assert_eq!(u.unpack_u32().unwrap(), 0x0607af);
		assert!(u.all_data_consumed());
	}

	#[test]
	fn bad_bool_is_an_error_not_a_panic() {
		let mut u = Unpacker::new(vec![0, 0, 0, 2]);
		assert_eq!(u.unpack_bool().unwrap_err().kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn opaque_longer_than_message_is_rejected() {
		let mut u = Unpacker::new(vec![0, 0, 0, 9, 1, 2]);
		assert_eq!(u.unpack_opaque().unwrap_err().kind(), ErrorKind::UnexpectedEof);
	}
}
