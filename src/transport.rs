//! Register access over the BINDER MODBus-over-TCP tunnel.
//!
//! The [`Transport`] trait is the seam between the oven controller and the wire.
//! [`TcpTransport`] implements it by opening one TCP connection per exchange:
//! the adaptor is never kept connected between requests, so other clients (and
//! the front panel) may change the device state between any two exchanges.
//!
//! ## Example
//!
//! ```no_run
//! use ovenctl_lib::{config::ConnectionConfig, transport::{TcpTransport, Transport}};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::new("oven.lab", ConnectionConfig::default());
//!     let mode = transport.read_words(0x1a22, 1)?;
//!     println!("Mode register: {:04x}", mode[0]);
//!     Ok(())
//! }
//! ```

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::protocol::{self as proto, FrameError};
use log::*;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Initial delay between connection attempts; doubled after each failure.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Word-level access to the device's registers.
pub trait Transport {
    /// Reads `count` consecutive words starting at `address`.
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Writes a single word.
    fn write_word(&mut self, address: u16, value: u16) -> Result<()>;

    /// Writes consecutive words starting at `address`.
    fn write_words(&mut self, address: u16, words: &[u16]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        (**self).read_words(address, count)
    }

    fn write_word(&mut self, address: u16, value: u16) -> Result<()> {
        (**self).write_word(address, value)
    }

    fn write_words(&mut self, address: u16, words: &[u16]) -> Result<()> {
        (**self).write_words(address, words)
    }
}

fn connect_once(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{host} did not resolve to any address"),
        )
    }))
}

/// Opens a TCP connection, retrying up to `max_retries` times.
///
/// The delay between attempts starts at [`INITIAL_BACKOFF`] and doubles after
/// every failure. With `max_retries == 0` exactly one attempt is made. The last
/// failure is returned as [`Error::Connect`].
pub fn connect(host: &str, port: u16, timeout: Duration, max_retries: u32) -> Result<TcpStream> {
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 0;
    loop {
        match connect_once(host, port, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                let left = max_retries - attempt;
                if left == 0 {
                    return Err(Error::Connect {
                        address: format!("{host}:{port}"),
                        source: err,
                    });
                }
                warn!("Cannot connect to {host}:{port}: {err}; {left} tries left");
            }
        }
        std::thread::sleep(delay);
        delay *= 2;
        attempt += 1;
    }
}

/// Transport over the serial-to-TCP adaptor, one connection per exchange.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    config: ConnectionConfig,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            host: host.into(),
            config,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Sends `request` and accumulates the response until `parse` accepts it.
    ///
    /// After every read the buffer is first checked for an error response, which
    /// is raised as [`Error::Device`] immediately. Otherwise `parse` is tried;
    /// [`FrameError::ShortMessage`] means "keep receiving", any other parse
    /// failure is fatal. A buffer that reaches `expected_len` bytes without
    /// parsing is reported as [`Error::BadResponse`]. The connection is closed
    /// on every exit path.
    pub fn exchange<T, F>(&self, request: &[u8], expected_len: usize, parse: F) -> Result<T>
    where
        F: Fn(&[u8]) -> std::result::Result<T, FrameError>,
    {
        let mut stream = connect(
            &self.host,
            self.config.port,
            self.config.connect_timeout,
            self.config.retries,
        )?;
        stream.set_read_timeout(self.config.read_timeout.filter(|t| !t.is_zero()))?;

        trace!("SEND: {:02x?}", request);
        stream.write_all(request)?;

        let mut response = Vec::with_capacity(expected_len);
        let mut chunk = vec![0u8; expected_len];
        loop {
            if response.len() >= expected_len {
                return Err(Error::BadResponse(response));
            }
            let remaining = expected_len - response.len();
            let received = stream.read(&mut chunk[..remaining])?;
            if received == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "connection closed after {} of {expected_len} bytes",
                        response.len()
                    ),
                )));
            }
            response.extend_from_slice(&chunk[..received]);
            trace!("RECV: {:02x?}", response);

            match proto::parse_error_response(&response) {
                Ok(Some(code)) => return Err(Error::Device(code)),
                Ok(None) | Err(FrameError::ShortMessage { .. }) => {}
                Err(err) => return Err(err.into()),
            }
            match parse(&response) {
                Ok(value) => return Ok(value),
                Err(FrameError::ShortMessage { length, wanted }) => {
                    trace!("Short message ({length} of {wanted} bytes), receiving more");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Transport for TcpTransport {
    fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        debug!("Read {count} words at {address:04x}");
        let request = proto::read_n_request(address, count);
        let words = self.exchange(
            &request,
            proto::read_n_response_len(count),
            proto::parse_read_n_response,
        )?;
        if words.len() != count as usize {
            return Err(Error::ResponseMismatch(format!(
                "asked for {count} words at {address:04x}, got {}",
                words.len()
            )));
        }
        Ok(words)
    }

    fn write_word(&mut self, address: u16, value: u16) -> Result<()> {
        debug!("Write {value:04x} to {address:04x}");
        let request = proto::write_one_request(address, value);
        let echo = self.exchange(
            &request,
            proto::write_response_len(),
            proto::parse_write_one_response,
        )?;
        if echo != (address, value) {
            return Err(Error::ResponseMismatch(format!(
                "wrote {value:04x} to {address:04x}, device echoed {:04x} to {:04x}",
                echo.1, echo.0
            )));
        }
        Ok(())
    }

    fn write_words(&mut self, address: u16, words: &[u16]) -> Result<()> {
        debug!("Write {:04x?} to {address:04x}", words);
        let request = proto::write_n_request(address, words);
        let echo = self.exchange(
            &request,
            proto::write_response_len(),
            proto::parse_write_n_response,
        )?;
        if echo != (address, words.len() as u16) {
            return Err(Error::ResponseMismatch(format!(
                "wrote {} words to {address:04x}, device acknowledged {} at {:04x}",
                words.len(),
                echo.1,
                echo.0
            )));
        }
        Ok(())
    }
}
