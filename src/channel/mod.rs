
// A byte-stream link to an instrument.  The acquisition protocol only needs the handful of primitives below, so
// serial ports, VXI-11 links and scripted test doubles all look the same to it.

use std::io::{self, Error, ErrorKind};
use std::thread;
use std::time::{Duration, Instant};

pub mod loopback;

#[cfg(feature = "serial")]
pub mod serial;

pub use loopback::LoopbackChannel;

#[cfg(feature = "serial")]
pub use serial::SerialChannel;

pub trait InstrumentChannel {

    /// Send one command.  The channel appends whatever terminator its transport needs.
    fn write(&mut self, command: &str) -> io::Result<()>;

    /// Block until `terminator` arrives and return the text in front of it.
    fn read_line(&mut self, terminator: &[u8], timeout: Duration) -> io::Result<String>;

    /// Block until exactly `n` bytes have arrived.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> io::Result<Vec<u8>>;

    /// Whatever is buffered right now, possibly nothing.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// One complete instrument-delimited message, for transports that frame messages natively.
    /// `None` means the transport is a plain byte stream.
    fn read_raw_block(&mut self, _timeout: Duration) -> io::Result<Option<Vec<u8>>> { Ok(None) }

    fn is_open(&self) -> bool;
    fn open(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

impl<C: InstrumentChannel + ?Sized> InstrumentChannel for Box<C> {
    fn write(&mut self, command: &str) -> io::Result<()> { (**self).write(command) }
    fn read_line(&mut self, terminator: &[u8], timeout: Duration) -> io::Result<String> { (**self).read_line(terminator, timeout) }
    fn read_exact(&mut self, n: usize, timeout: Duration) -> io::Result<Vec<u8>> { (**self).read_exact(n, timeout) }
    fn read_available(&mut self) -> io::Result<Vec<u8>> { (**self).read_available() }
    fn read_raw_block(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> { (**self).read_raw_block(timeout) }
    fn is_open(&self) -> bool { (**self).is_open() }
    fn open(&mut self) -> io::Result<()> { (**self).open() }
    fn close(&mut self) -> io::Result<()> { (**self).close() }
}

pub(crate) fn timed_out(what: &str, timeout: Duration) -> Error {
    Error::new(ErrorKind::TimedOut, format!("{} not complete after {:?}", what, timeout))
}

/// Poll `read_available` until the collected bytes end with `terminator`, sleeping `poll` between empty reads.
pub fn read_until_terminator<C: InstrumentChannel + ?Sized>(channel: &mut C, terminator: &[u8], timeout: Duration, poll: Duration) -> io::Result<Vec<u8>> {
    let start = Instant::now();
    let mut out: Vec<u8> = vec![];

    loop {
        let chunk = channel.read_available()?;
        if chunk.is_empty() {
            if out.ends_with(terminator) {
                return Ok(out);
            }
            if start.elapsed() >= timeout {
                return Err(timed_out("Terminated read", timeout));
            }
            thread::sleep(poll);
        } else {
            out.extend_from_slice(&chunk);
        }
    }
}
