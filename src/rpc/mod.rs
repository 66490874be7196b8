
// ONC remote procedure calls (RFC 5531) over TCP, just enough of it to carry VXI-11

pub const RPCVERSION:u32 = 2;

pub const CALL:i32  = 0;
pub const REPLY:i32 = 1;

pub const MSG_ACCEPTED:i32 = 0;
pub const MSG_DENIED:i32   = 1;

pub const RPC_MISMATCH:i32 = 0;
pub const AUTH_ERROR:i32   = 1;

pub const SUCCESS:i32       = 0;      // RPC executed successfully
pub const PROG_UNAVAIL:i32  = 1;      // remote hasn't exported program
pub const PROG_MISMATCH:i32 = 2;      // remote can't support version #
pub const PROC_UNAVAIL:i32  = 3;      // program can't support procedure
pub const GARBAGE_ARGS:i32  = 4;      // procedure can't decode params

pub const AUTH_NONE:i32 = 0;
pub const IPPROTO_TCP:u32 = 6;

const LAST_FRAGMENT:u32 = 0x8000_0000;

// Largest reassembled record accepted from a peer
pub const MAX_RECORD_LEN:usize = 0x0040_0000;

use std::io::{self, Error, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::trace;

use crate::xdr::{Packer, Unpacker};

pub mod port_mapping;

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

pub fn pack_call_header(packer:&mut Packer, xid:u32, prog:u32, vers:u32, prc:u32) -> io::Result<()> {
	packer.pack_u32(xid)?;
	packer.pack_i32(CALL)?;
	packer.pack_u32(RPCVERSION)?;
	packer.pack_u32(prog)?;
	packer.pack_u32(vers)?;
	packer.pack_u32(prc)?;

	// Credentials and verifier, both AUTH_NONE with an empty body
	packer.pack_i32(AUTH_NONE)?;
	packer.pack_opaque(&[])?;
	packer.pack_i32(AUTH_NONE)?;
	packer.pack_opaque(&[])
}

/// Check a reply header and return its xid.  The unpacker is left at the start of the procedure's results.
pub fn unpack_reply_header(unpacker:&mut Unpacker) -> io::Result<u32> {
	let xid:u32 = unpacker.unpack_u32()?;

	if unpacker.unpack_i32()? != REPLY { return Err(err("Expected a REPLY message")); }

	match unpacker.unpack_i32()? {
		MSG_ACCEPTED => { },
		MSG_DENIED => {
			return match unpacker.unpack_i32()? {
				RPC_MISMATCH => Err(err("Call denied: RPC version mismatch")),
				AUTH_ERROR   => Err(err("Call denied: authentication error")),
				_            => Err(err("Call denied for an unknown reason")),
			}
		},
		_ => return Err(err("Reply is neither accepted nor denied")),
	}

	// Verifier, unused with AUTH_NONE
	unpacker.unpack_i32()?;
	unpacker.unpack_opaque()?;

	match unpacker.unpack_i32()? {
		SUCCESS       => Ok(xid),
		PROG_UNAVAIL  => Err(err("Program unavailable")),
		PROG_MISMATCH => Err(err("Program version mismatch")),
		PROC_UNAVAIL  => Err(err("Procedure unavailable")),
		GARBAGE_ARGS  => Err(err("Server could not decode the arguments")),
		_             => Err(err("Call failed for an unknown reason")),
	}
}

// Record marking: each fragment is prefixed with its length, the top bit flags the last fragment

pub fn write_record<W: Write>(w:&mut W, data:&[u8]) -> io::Result<()> {
	if data.len() as u64 >= LAST_FRAGMENT as u64 {
		return Err(Error::new(ErrorKind::InvalidInput, "RPC record too long"));
	}
	let mut out:Vec<u8> = Vec::with_capacity(data.len() + 4);
	out.write_u32::<BigEndian>(data.len() as u32 | LAST_FRAGMENT)?;
	out.extend_from_slice(data);
	w.write_all(&out)
}

pub fn read_record<R: Read>(r:&mut R) -> io::Result<Vec<u8>> {
	let mut record:Vec<u8> = vec![];
	loop {
		let mark:u32 = r.read_u32::<BigEndian>()?;
		let n = (mark & !LAST_FRAGMENT) as usize;

		let start = record.len();
		if start + n > MAX_RECORD_LEN {
			return Err(Error::new(ErrorKind::InvalidData, format!("RPC record of {} bytes exceeds the {} byte limit", start + n, MAX_RECORD_LEN)));
		}
		record.resize(start + n, 0);
		r.read_exact(&mut record[start..])?;

		if mark & LAST_FRAGMENT != 0 { return Ok(record); }
	}
}

pub struct RpcClient<S = TcpStream> {
	stream: S,
	prog: u32,
	vers: u32,
	lastxid: u32,
}

impl RpcClient<TcpStream> {

	pub fn connect<A: ToSocketAddrs>(addr:A, prog:u32, vers:u32, timeout:Duration) -> io::Result<Self> {
		let stream = TcpStream::connect(addr)?;
		stream.set_read_timeout(Some(timeout))?;
		stream.set_write_timeout(Some(timeout))?;
		stream.set_nodelay(true)?;
		Ok(Self::over(stream, prog, vers))
	}

}

impl<S: Read + Write> RpcClient<S> {

	pub fn over(stream:S, prog:u32, vers:u32) -> Self { Self{ stream, prog, vers, lastxid: 0 } }

	/// Call procedure `prc` with already packed arguments and return an unpacker positioned at the results.
	pub fn call(&mut self, prc:u32, args:&Packer) -> io::Result<Unpacker> {
		self.lastxid = self.lastxid.wrapping_add(1);

		let mut msg = Packer::new();
		pack_call_header(&mut msg, self.lastxid, self.prog, self.vers, prc)?;
		let mut bytes = msg.as_bytes().to_vec();
		bytes.extend_from_slice(args.as_bytes());
		write_record(&mut self.stream, &bytes)?;
		trace!("RPC call prog={} proc={} xid={} ({} bytes)", self.prog, prc, self.lastxid, bytes.len());

		loop {
			let mut unpacker = Unpacker::new(read_record(&mut self.stream)?);
			let xid = unpack_reply_header(&mut unpacker)?;

			if xid == self.lastxid {
				return Ok(unpacker);
			} else if xid < self.lastxid {
				// Reply to an earlier call that already timed out on our side
				continue;
			} else {
				return Err(err("Reply xid is newer than any call made"));
			}
		}
	}

	pub fn get_ref(&self) -> &S { &self.stream }

	pub fn into_inner(self) -> S { self.stream }
}
