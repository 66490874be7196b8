use std::io::{self, Error, ErrorKind, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::SerialPort;

use super::{read_until_terminator, InstrumentChannel};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const COMMAND_TERMINATOR: &str = "\r\n";

// Internal timeout for single reads on the port; overall deadlines are enforced above this
const PORT_TIMEOUT: Duration = Duration::from_millis(100);
const LINE_POLL: Duration = Duration::from_millis(10);

/// RS-232 link.  Data arrives as an unframed byte stream, so curve blocks are collected by polling.
pub struct SerialChannel {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {

    pub fn new(path: &str, baud_rate: u32) -> Self {
        Self { path: path.to_owned(), baud_rate, port: None }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| Error::new(ErrorKind::NotConnected, "Serial port is not open"))
    }
}

impl InstrumentChannel for SerialChannel {

    fn write(&mut self, command: &str) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(command.as_bytes())?;
        port.write_all(COMMAND_TERMINATOR.as_bytes())?;
        port.flush()
    }

    fn read_line(&mut self, terminator: &[u8], timeout: Duration) -> io::Result<String> {
        let mut line = read_until_terminator(self, terminator, timeout, LINE_POLL)?;
        line.truncate(line.len() - terminator.len());
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        let mut buf = vec![0u8; n];
        let res = port.read_exact(&mut buf);
        port.set_timeout(PORT_TIMEOUT)?;
        res.map(|_| buf)
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let port = self.port()?;
        let n = port.bytes_to_read()? as usize;
        let mut buf = vec![0u8; n];
        if n > 0 {
            port.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn is_open(&self) -> bool { self.port.is_some() }

    fn open(&mut self) -> io::Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()?;
        debug!("Serial port '{}' opened at {} baud", self.path, self.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.path);
        }
        Ok(())
    }
}
