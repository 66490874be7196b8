
// VXI-11 device core channel: GPIB-style instrument messages carried over ONC-RPC on a LAN

pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT_MS:u32 = 10000;
pub const DEFAULT_DEVICE:&str = "inst0";

// Instruments end each response message with a bare newline on top of the END indicator
pub const MESSAGE_TERMINATOR:&str = "\n";

pub const OPERATION_FLAGS_END:i32 = 8;

// Bits of the reason field in a device_read reply
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

const READ_REQUEST_SIZE:u32 = 0x0010_0000;
const TCP_TIMEOUT_MARGIN:Duration = Duration::from_secs(1);

use std::collections::VecDeque;
use std::io::{self, Error, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::channel::{timed_out, InstrumentChannel};
use crate::rpc::port_mapping::lookup_tcp_port;
use crate::rpc::RpcClient;
use crate::xdr::Packer;

fn device_error(code:i32) -> io::Error {
    let (kind, msg) = match code {
        1  => (ErrorKind::InvalidInput, "Syntax error"),
        3  => (ErrorKind::NotFound, "Device not accessible"),
        4  => (ErrorKind::NotConnected, "Invalid link identifier"),
        5  => (ErrorKind::InvalidInput, "Parameter error"),
        6  => (ErrorKind::NotConnected, "Channel not established"),
        8  => (ErrorKind::Unsupported, "Operation not supported"),
        9  => (ErrorKind::OutOfMemory, "Out of resources"),
        11 => (ErrorKind::WouldBlock, "Device locked by another link"),
        12 => (ErrorKind::Other, "No lock held by this link"),
        15 => (ErrorKind::TimedOut, "I/O timeout"),
        17 => (ErrorKind::Other, "I/O error"),
        21 => (ErrorKind::InvalidInput, "Invalid address"),
        23 => (ErrorKind::Interrupted, "Abort"),
        29 => (ErrorKind::AlreadyExists, "Channel already established"),
        _  => (ErrorKind::Other, "Unknown device error"),
    };
    Error::new(kind, format!("{} (VXI-11 error {})", msg, code))
}

fn millis(d:Duration) -> u32 { d.as_millis().min(u32::MAX as u128) as u32 }

#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub link_id: i32,
    pub abort_port: u32,
    pub max_recv_size: u32,
}

pub struct CoreClient<S = TcpStream> {
    client: RpcClient<S>,
    link: Option<Link>,
}

impl<S: Read + Write> CoreClient<S> {

    pub fn new(client:RpcClient<S>) -> Self { Self{ client, link: None } }

    pub fn link(&self) -> Option<Link> { self.link }

    fn link_id(&self) -> io::Result<i32> {
        self.link.map(|l| l.link_id).ok_or_else(|| Error::new(ErrorKind::NotConnected, "No link"))
    }

    pub fn create_link(&mut self, device:&str) -> io::Result<Link> {
        if self.link.is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists, "Already connected to a link"));
        }

        let mut args = Packer::new();
        args.pack_i32(CLIENT_ID)?;
        args.pack_bool(false)?;
        args.pack_u32(DEFAULT_LOCK_TIMEOUT_MS)?;
        args.pack_string(device)?;

        let mut res = self.client.call(CREATE_LINK, &args)?;
        let error:i32         = res.unpack_i32()?;
        let link_id:i32       = res.unpack_i32()?;
        let abort_port:u32    = res.unpack_u32()?;
        let max_recv_size:u32 = res.unpack_u32()?;

        if error != 0 { return Err(device_error(error)); }

        let link = Link{ link_id, abort_port, max_recv_size };
        self.link = Some(link);
        Ok(link)
    }

    pub fn device_write(&mut self, data:&[u8], io_timeout:Duration) -> io::Result<()> {
        let link_id = self.link_id()?;
        let max = self.link.map(|l| l.max_recv_size as usize).filter(|n| *n > 0).unwrap_or(data.len().max(1));

        // Messages longer than the device buffer go out in pieces; only the last one carries END
        let chunks:Vec<&[u8]> = if data.is_empty() { vec![data] } else { data.chunks(max).collect() };
        let last = chunks.len() - 1;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let mut args = Packer::new();
            args.pack_i32(link_id)?;
            args.pack_u32(millis(io_timeout))?;
            args.pack_u32(DEFAULT_LOCK_TIMEOUT_MS)?;
            args.pack_i32(if idx == last { OPERATION_FLAGS_END } else { 0 })?;
            args.pack_opaque(chunk)?;

            let mut res = self.client.call(DEVICE_WRITE, &args)?;
            let error:i32 = res.unpack_i32()?;
            let size:u32  = res.unpack_u32()?;

            if error != 0 { return Err(device_error(error)); }
            if size as usize != chunk.len() {
                return Err(Error::new(ErrorKind::WriteZero, "Number of bytes in confirmation doesn't match number of bytes sent"));
            }
        }

        Ok(())
    }

    /// Read one complete device message, following partial reads until the END indicator.
    pub fn device_read(&mut self, io_timeout:Duration) -> io::Result<Vec<u8>> {
        let link_id = self.link_id()?;
        let mut message:Vec<u8> = vec![];

        loop {
            let mut args = Packer::new();
            args.pack_i32(link_id)?;
            args.pack_u32(READ_REQUEST_SIZE)?;
            args.pack_u32(millis(io_timeout))?;
            args.pack_u32(DEFAULT_LOCK_TIMEOUT_MS)?;
            args.pack_i32(0)?;
            args.pack_i32(0)?;

            let mut res = self.client.call(DEVICE_READ, &args)?;
            let error:i32  = res.unpack_i32()?;
            let reason:i32 = res.unpack_i32()?;
            let data       = res.unpack_opaque()?;

            if error != 0 { return Err(device_error(error)); }

            message.extend_from_slice(&data);
            if reason & REASON_END != 0 {
                return Ok(message);
            }
            if reason & (REASON_REQCNT | REASON_CHR) == 0 && data.is_empty() {
                return Err(Error::new(ErrorKind::InvalidData, "Device read returned nothing and no reason"));
            }
        }
    }

    pub fn destroy_link(&mut self) -> io::Result<()> {
        let link_id = self.link_id()?;

        let mut args = Packer::new();
        args.pack_i32(link_id)?;
        let mut res = self.client.call(DESTROY_LINK, &args)?;
        self.link = None;

        match res.unpack_i32()? {
            0 => Ok(()),
            e => Err(device_error(e)),
        }
    }
}

/// Byte stream a VXI-11 link can run over.
pub trait CoreStream: Read + Write + Sized {
    /// Find the device core program on `host` and connect to it.
    fn connect_core(host:&str, timeout:Duration) -> io::Result<RpcClient<Self>>;

    fn set_timeout(&self, timeout:Duration) -> io::Result<()>;
}

impl CoreStream for TcpStream {

    fn connect_core(host:&str, timeout:Duration) -> io::Result<RpcClient<Self>> {
        let port = lookup_tcp_port(host, DEVICE_CORE_PROG, DEVICE_CORE_VERS, timeout)?;
        debug!("Device core on {} listens on port {}", host, port);
        RpcClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS, timeout)
    }

    fn set_timeout(&self, timeout:Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))
    }
}

/// Block-oriented channel to a LAN instrument.  Each device message arrives whole, so the curve block needs no
/// polling.
pub struct Vxi11Channel<S: CoreStream = TcpStream> {
    host: String,
    device: String,
    connect_timeout: Duration,
    core: Option<CoreClient<S>>,
    buffer: VecDeque<u8>,
}

impl Vxi11Channel<TcpStream> {

    pub fn new(host:&str) -> Self { Self::with_device(host, DEFAULT_DEVICE) }

    pub fn with_device(host:&str, device:&str) -> Self {
        Self{ host: host.to_owned(), device: device.to_owned(), connect_timeout: Duration::from_secs(5), core: None, buffer: VecDeque::new() }
    }
}

impl<S: CoreStream> Vxi11Channel<S> {

    /// Wrap a core client whose link is already established.
    pub fn over(core:CoreClient<S>, host:&str) -> Self {
        Self{ host: host.to_owned(), device: DEFAULT_DEVICE.to_owned(), connect_timeout: Duration::from_secs(5), core: Some(core), buffer: VecDeque::new() }
    }

    fn core(&mut self, timeout:Duration) -> io::Result<&mut CoreClient<S>> {
        let core = self.core.as_mut().ok_or_else(|| Error::new(ErrorKind::NotConnected, "VXI-11 link is not open"))?;
        core.client.get_ref().set_timeout(timeout + TCP_TIMEOUT_MARGIN)?;
        Ok(core)
    }

    fn pull_message(&mut self, timeout:Duration) -> io::Result<()> {
        let msg = self.core(timeout)?.device_read(timeout)?;
        self.buffer.extend(msg);
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        self.buffer.clear();
        match self.core.take() {
            Some(mut core) => {
                let res = core.destroy_link();
                debug!("VXI-11 link to {} closed", self.host);
                res
            },
            None => Ok(()),
        }
    }
}

impl<S: CoreStream> InstrumentChannel for Vxi11Channel<S> {

    fn write(&mut self, command:&str) -> io::Result<()> {
        let timeout = self.connect_timeout;
        self.core(timeout)?.device_write(command.as_bytes(), timeout)
    }

    fn read_line(&mut self, terminator:&[u8], timeout:Duration) -> io::Result<String> {
        let find = |buf:&VecDeque<u8>| {
            let v:Vec<u8> = buf.iter().copied().collect();
            v.windows(terminator.len().max(1)).position(|w| w == terminator)
        };

        if find(&self.buffer).is_none() {
            self.pull_message(timeout)?;
        }

        // A device message is a complete response even when it ends in a bare newline
        let line:Vec<u8> = match find(&self.buffer) {
            Some(end) => {
                let line:Vec<u8> = self.buffer.drain(..end).collect();
                self.buffer.drain(..terminator.len());
                line
            },
            None => self.buffer.drain(..).collect(),
        };
        let text = String::from_utf8_lossy(&line);
        Ok(text.trim_end_matches(|c| c == '\r' || c == '\n').to_owned())
    }

    fn read_exact(&mut self, n:usize, timeout:Duration) -> io::Result<Vec<u8>> {
        let start = Instant::now();
        while self.buffer.len() < n {
            let remaining = timeout.checked_sub(start.elapsed()).filter(|d| !d.is_zero())
                .ok_or_else(|| timed_out(&format!("Read of {} bytes", n), timeout))?;
            self.pull_message(remaining)?;
        }
        Ok(self.buffer.drain(..n).collect())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.buffer.drain(..).collect())
    }

    fn read_raw_block(&mut self, timeout:Duration) -> io::Result<Option<Vec<u8>>> {
        let mut block:Vec<u8> = self.buffer.drain(..).collect();
        block.extend(self.core(timeout)?.device_read(timeout)?);
        Ok(Some(block))
    }

    fn is_open(&self) -> bool { self.core.is_some() }

    fn open(&mut self) -> io::Result<()> {
        if self.core.is_some() {
            return Ok(());
        }

        let mut core = CoreClient::new(S::connect_core(&self.host, self.connect_timeout)?);
        let link = core.create_link(&self.device)?;
        debug!("VXI-11 link {} to {} ({})", link.link_id, self.host, self.device);

        self.core = Some(core);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> { self.release() }
}

impl<S: CoreStream> Drop for Vxi11Channel<S> {

    fn drop(&mut self) {
        if let Err(e) = self.release() { warn!("Unable to destroy VXI-11 link to {}: {}", self.host, e); }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::rpc::{write_record, AUTH_NONE, MSG_ACCEPTED, REPLY, SUCCESS};

    struct Duplex { rx: Cursor<Vec<u8>>, tx: Vec<u8> }

    impl Read for Duplex {
        fn read(&mut self, buf:&mut [u8]) -> io::Result<usize> { self.rx.read(buf) }
    }
    impl Write for Duplex {
        fn write(&mut self, buf:&[u8]) -> io::Result<usize> { self.tx.write(buf) }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    impl CoreStream for Duplex {
        fn connect_core(_host:&str, _timeout:Duration) -> io::Result<RpcClient<Self>> {
            Err(Error::new(ErrorKind::NotConnected, "no network here"))
        }
        fn set_timeout(&self, _timeout:Duration) -> io::Result<()> { Ok(()) }
    }

    fn reply(wire:&mut Vec<u8>, xid:u32, body:impl FnOnce(&mut Packer)) {
        let mut p = Packer::new();
        p.pack_u32(xid).unwrap();
        p.pack_i32(REPLY).unwrap();
        p.pack_i32(MSG_ACCEPTED).unwrap();
        p.pack_i32(AUTH_NONE).unwrap();
        p.pack_opaque(&[]).unwrap();
        p.pack_i32(SUCCESS).unwrap();
        body(&mut p);
        write_record(wire, p.as_bytes()).unwrap();
    }

    fn linked_core(wire:&mut Vec<u8>) {
        reply(wire, 1, |p| {
            p.pack_i32(0).unwrap();
            p.pack_i32(5).unwrap();
            p.pack_u32(0).unwrap();
            p.pack_u32(1024).unwrap();
        });
    }

    #[test]
    fn device_read_follows_partial_replies_until_end() {
        let mut wire = vec![];
        linked_core(&mut wire);
        reply(&mut wire, 2, |p| { p.pack_i32(0).unwrap(); p.pack_i32(REASON_REQCNT).unwrap(); p.pack_opaque(b"#15ab").unwrap(); });
        reply(&mut wire, 3, |p| { p.pack_i32(0).unwrap(); p.pack_i32(REASON_END).unwrap(); p.pack_opaque(b"cde\n").unwrap(); });

        let client = RpcClient::over(Duplex{ rx: Cursor::new(wire), tx: vec![] }, DEVICE_CORE_PROG, DEVICE_CORE_VERS);
        let mut core = CoreClient::new(client);
        assert_eq!(core.create_link("inst0").unwrap().link_id, 5);
        assert_eq!(core.device_read(Duration::from_secs(1)).unwrap(), b"#15abcde\n".to_vec());
    }

    #[test]
    fn device_timeout_maps_to_timed_out() {
        let mut wire = vec![];
        linked_core(&mut wire);
        reply(&mut wire, 2, |p| { p.pack_i32(15).unwrap(); p.pack_i32(0).unwrap(); p.pack_opaque(&[]).unwrap(); });

        let client = RpcClient::over(Duplex{ rx: Cursor::new(wire), tx: vec![] }, DEVICE_CORE_PROG, DEVICE_CORE_VERS);
        let mut core = CoreClient::new(client);
        core.create_link("inst0").unwrap();
        assert_eq!(core.device_read(Duration::from_secs(1)).unwrap_err().kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn failed_create_link_leaves_no_link() {
        let mut wire = vec![];
        reply(&mut wire, 1, |p| {
            p.pack_i32(3).unwrap();
            p.pack_i32(0).unwrap();
            p.pack_u32(0).unwrap();
            p.pack_u32(0).unwrap();
        });

        let client = RpcClient::over(Duplex{ rx: Cursor::new(wire), tx: vec![] }, DEVICE_CORE_PROG, DEVICE_CORE_VERS);
        let mut core = CoreClient::new(client);
        assert_eq!(core.create_link("inst0").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(core.link().is_none());
    }

    #[test]
    fn writes_without_a_link_are_refused() {
        let client = RpcClient::over(Duplex{ rx: Cursor::new(vec![]), tx: vec![] }, DEVICE_CORE_PROG, DEVICE_CORE_VERS);
        let mut core = CoreClient::new(client);
        assert_eq!(core.device_write(b"CURV?", Duration::from_secs(1)).unwrap_err().kind(), ErrorKind::NotConnected);
    }

    // Replies for a link that already exists, in the order the calls will be made
    struct Script { wire: Vec<u8>, xid: u32 }

    impl Script {
        fn linked() -> Self {
            let mut script = Script{ wire: vec![], xid: 0 };
            script.next(|p| {
                p.pack_i32(0).unwrap();
                p.pack_i32(7).unwrap();
                p.pack_u32(0).unwrap();
                p.pack_u32(1024).unwrap();
            });
            script
        }

        fn next(&mut self, body:impl FnOnce(&mut Packer)) {
            self.xid += 1;
            reply(&mut self.wire, self.xid, body);
        }

        fn wrote(&mut self, command:&str) {
            let n = command.len() as u32;
            self.next(|p| { p.pack_i32(0).unwrap(); p.pack_u32(n).unwrap(); });
        }

        fn message(&mut self, data:&[u8]) {
            self.next(|p| { p.pack_i32(0).unwrap(); p.pack_i32(REASON_END).unwrap(); p.pack_opaque(data).unwrap(); });
        }

        fn destroyed(&mut self) { self.next(|p| p.pack_i32(0).unwrap()); }

        fn channel(self) -> Vxi11Channel<Duplex> {
            let client = RpcClient::over(Duplex{ rx: Cursor::new(self.wire), tx: vec![] }, DEVICE_CORE_PROG, DEVICE_CORE_VERS);
            let mut core = CoreClient::new(client);
            core.create_link("inst0").unwrap();
            Vxi11Channel::over(core, "scope")
        }
    }

    const SECOND:Duration = Duration::from_secs(1);

    #[test]
    fn lines_are_taken_from_buffered_messages() {
        let mut script = Script::linked();
        script.message(b"A\nB\n");
        script.message(b"TEK,TDS 2024\n");
        let mut ch = script.channel();

        assert_eq!(ch.read_line(b"\n", SECOND).unwrap(), "A");
        assert_eq!(ch.read_line(b"\n", SECOND).unwrap(), "B");
        // No CRLF anywhere, the whole message is the answer
        assert_eq!(ch.read_line(b"\r\n", SECOND).unwrap(), "TEK,TDS 2024");
    }

    #[test]
    fn exact_reads_pull_messages_until_satisfied() {
        let mut script = Script::linked();
        script.message(b"abc");
        script.message(b"defg");
        let mut ch = script.channel();

        assert_eq!(ch.read_exact(5, SECOND).unwrap(), b"abcde".to_vec());
        assert_eq!(ch.read_available().unwrap(), b"fg".to_vec());
        assert!(ch.read_available().unwrap().is_empty());
    }

    #[test]
    fn raw_block_keeps_bytes_already_buffered() {
        let mut script = Script::linked();
        script.message(b"X\n#13ab");
        script.message(b"c\n");
        let mut ch = script.channel();

        assert_eq!(ch.read_line(b"\n", SECOND).unwrap(), "X");
        assert_eq!(ch.read_raw_block(SECOND).unwrap(), Some(b"#13abc\n".to_vec()));
    }

    #[test]
    fn close_destroys_the_link_once() {
        let mut script = Script::linked();
        script.destroyed();
        let mut ch = script.channel();

        assert!(ch.is_open());
        ch.close().unwrap();
        assert!(!ch.is_open());
        ch.close().unwrap();
        assert_eq!(ch.write("*IDN?").unwrap_err().kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn waveform_over_a_link() {
        use crate::config::AcquisitionConfig;
        use crate::devices::tektronix::WaveformAcquirer;

        let cfg = AcquisitionConfig{ terminator: MESSAGE_TERMINATOR.to_owned(), ..Default::default() };

        // Two-byte samples of 10, the very last byte a carriage return
        let mut payload:Vec<u8> = [0u8, 10].repeat(2500);
        payload[4999] = 0x0D;
        let mut block = b":CURVE #45000".to_vec();
        block.extend_from_slice(&payload);
        block.push(b'\n');

        let mut script = Script::linked();
        for cmd in ["DAT:SOU CH1", "DAT:ENC RIB", "DAT:WID 2", "DAT:STAR 1", "DAT:STOP 2500", "WFMPRe?"] {
            script.wrote(cmd);
        }
        script.message(b":WFMPRE:BYT_NR 2;ENC BIN;YOFF 10;YMULT 0.5;XZERO 0;XINCR 0.002\n");
        script.wrote("CURV?");
        script.message(&block);
        script.destroyed();
        let mut ch = script.channel();

        let wf = WaveformAcquirer::new(cfg).unwrap().acquire(&mut ch).unwrap();
        assert_eq!(wf.len(), 2500);
        assert_eq!(wf.voltage()[0], 0.0);
        assert_eq!(wf.voltage()[2499], 1.5);
        assert!(!ch.is_open());
    }
}
