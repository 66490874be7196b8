use std::collections::{HashMap, VecDeque};
use std::io::{self, Error, ErrorKind};
use std::time::Duration;

use super::{timed_out, InstrumentChannel};

/// In-memory stand-in for an instrument.
///
/// Every written command is recorded.  A command with a scripted response queues that response as if the
/// instrument had sent it.  In stream mode `read_available` hands out at most `chunk` bytes per call, the way a
/// slow serial port trickles data in; in block mode the whole response comes back from `read_raw_block`.
/// Reads that would need bytes nobody is going to send fail with `TimedOut` straight away.
pub struct LoopbackChannel {
    chunk: Option<usize>,
    responses: HashMap<String, Vec<u8>>,
    pending: VecDeque<u8>,
    commands: Vec<String>,
    open: bool,
    close_count: usize,
    fail_write_on: Option<String>,
    fail_close: bool,
}

impl LoopbackChannel {

    pub fn stream(chunk: usize) -> Self { Self::with_chunk(Some(chunk.max(1))) }
    pub fn block() -> Self { Self::with_chunk(None) }

    fn with_chunk(chunk: Option<usize>) -> Self {
        Self {
            chunk,
            responses: HashMap::new(),
            pending: VecDeque::new(),
            commands: vec![],
            open: false,
            close_count: 0,
            fail_write_on: None,
            fail_close: false,
        }
    }

    pub fn respond(&mut self, command: &str, response: Vec<u8>) {
        self.responses.insert(command.to_owned(), response);
    }

    /// Make writes of `command` fail as if the link dropped.
    pub fn fail_write_on(&mut self, command: &str) { self.fail_write_on = Some(command.to_owned()); }
    pub fn fail_close(&mut self, fail: bool) { self.fail_close = fail; }

    /// Queue bytes the instrument sends without being asked.
    pub fn inject(&mut self, bytes: &[u8]) { self.pending.extend(bytes); }

    pub fn commands(&self) -> &[String] { &self.commands }
    pub fn close_count(&self) -> usize { self.close_count }
    pub fn pending_len(&self) -> usize { self.pending.len() }

    fn take(&mut self, n: usize) -> Vec<u8> { self.pending.drain(..n).collect() }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open { Ok(()) }
        else { Err(Error::new(ErrorKind::NotConnected, "Loopback channel is closed")) }
    }
}

impl InstrumentChannel for LoopbackChannel {

    fn write(&mut self, command: &str) -> io::Result<()> {
        self.ensure_open()?;
        self.commands.push(command.to_owned());

        if self.fail_write_on.as_deref() == Some(command) {
            return Err(Error::new(ErrorKind::BrokenPipe, format!("Write of {:?} failed", command)));
        }
        if let Some(response) = self.responses.get(command) {
            self.pending.extend(response.iter().copied());
        }
        Ok(())
    }

    fn read_line(&mut self, terminator: &[u8], timeout: Duration) -> io::Result<String> {
        self.ensure_open()?;
        let buf: Vec<u8> = self.pending.iter().copied().collect();
        let end = buf.windows(terminator.len().max(1)).position(|w| w == terminator)
            .ok_or_else(|| timed_out("Line read", timeout))?;

        let line = self.take(end);
        self.take(terminator.len());
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        self.ensure_open()?;
        if self.pending.len() < n {
            return Err(timed_out(&format!("Read of {} bytes", n), timeout));
        }
        Ok(self.take(n))
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        self.ensure_open()?;
        let n = match self.chunk {
            Some(chunk) => chunk.min(self.pending.len()),
            None => self.pending.len(),
        };
        Ok(self.take(n))
    }

    fn read_raw_block(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if self.chunk.is_some() {
            return Ok(None);
        }
        if self.pending.is_empty() {
            return Err(timed_out("Block read", timeout));
        }
        let n = self.pending.len();
        Ok(Some(self.take(n)))
    }

    fn is_open(&self) -> bool { self.open }

    fn open(&mut self) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.close_count += 1;
        if self.fail_close {
            return Err(Error::new(ErrorKind::Other, "Loopback channel refused to close"));
        }
        self.open = false;
        self.pending.clear();
        Ok(())
    }
}
