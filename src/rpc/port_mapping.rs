
// Portmapper (RFC 1833, version 2) lookup of the TCP port a program listens on

pub const PMAP_PROG:u32 = 100000;
pub const PMAP_VERS:u32 = 2;
pub const PMAP_PORT:u16 = 111;

pub const PMAPPROC_GETPORT:u32 = 3;     // (mapping) -> unsigned int

use std::io::{self, Error, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::xdr::Packer;

use super::{RpcClient, IPPROTO_TCP};

pub fn get_port<S: Read + Write>(client:&mut RpcClient<S>, prog:u32, vers:u32) -> io::Result<u16> {
	let mut args = Packer::new();
	args.pack_u32(prog)?;
	args.pack_u32(vers)?;
	args.pack_u32(IPPROTO_TCP)?;
	args.pack_u32(0)?;

	let mut results = client.call(PMAPPROC_GETPORT, &args)?;
	let port:u32 = results.unpack_u32()?;

	match port {
		0 => Err(Error::new(ErrorKind::NotFound, format!("Program {:#x} version {} is not registered", prog, vers))),
		p if p > u16::MAX as u32 => Err(Error::new(ErrorKind::InvalidData, "Portmapper returned an out of range port")),
		p => Ok(p as u16),
	}
}

/// Ask the portmapper on `host` where `prog` lives.
pub fn lookup_tcp_port(host:&str, prog:u32, vers:u32, timeout:Duration) -> io::Result<u16> {
	let mut client:RpcClient<TcpStream> = RpcClient::connect((host, PMAP_PORT), PMAP_PROG, PMAP_VERS, timeout)?;
	get_port(&mut client, prog, vers)
}
