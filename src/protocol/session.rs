//! One control-channel connection to the natasha process
//!
//! The peer serves a single request at a time: there is no pipelining and no
//! multiplexing. A reply must be fully drained before the next command goes
//! out, otherwise the byte stream desynchronizes. The session tracks unread
//! payload bytes and refuses to send while any remain.
//!
//! The request timeout bounds the whole session, not each read: a deadline is
//! fixed when the session opens and every read and write gets only the time
//! that remains. Name resolution is charged to the same deadline but cannot be
//! interrupted, so a hanging resolver can still overrun it.

use crate::protocol::codec::{self, Command, ReplyHeader, HEADER_WIDTH, MAX_PAYLOAD};
use crate::{ExporterError, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Byte stream a session runs over.
pub trait Transport: Read + Write {
    /// Bounds the next blocking read or write. `timeout` is never zero.
    fn set_io_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    /// Releases the underlying connection.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn set_io_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

pub struct Session<T: Transport = TcpStream> {
    stream: Option<T>,
    pending: usize,
    deadline: Option<Instant>,
}

impl Session<TcpStream> {
    /// Connects to `address` and applies `timeout` to the connect and to every
    /// read and write of the session.
    pub fn open(address: &str, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let addrs = address
            .to_socket_addrs()
            .map_err(|source| ExporterError::ConnectFailed {
                address: address.to_string(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            let left = remaining(deadline)?;
            debug!("Connecting to natasha at {}", addr);
            match TcpStream::connect_timeout(&addr, left) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(Session::with_deadline(stream, deadline));
                }
                Err(e) => {
                    debug!("Connection to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(ExporterError::ConnectFailed {
            address: address.to_string(),
            source: last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
            }),
        })
    }
}

impl<T: Transport> Session<T> {
    /// A session without a deadline; reads wait as long as the transport does.
    pub fn new(stream: T) -> Self {
        Self {
            stream: Some(stream),
            pending: 0,
            deadline: None,
        }
    }

    /// A session that fails with `Timeout` once `deadline` has passed.
    pub fn with_deadline(stream: T, deadline: Instant) -> Self {
        Self {
            stream: Some(stream),
            pending: 0,
            deadline: Some(deadline),
        }
    }

    /// Payload bytes announced by the last header and not read yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Sends `cmd` and decodes the reply header.
    pub fn exchange(&mut self, cmd: Command) -> Result<ReplyHeader> {
        if self.pending > 0 {
            return Err(ExporterError::Desynchronized {
                command: cmd.as_str(),
                pending: self.pending,
            });
        }

        self.write_all(&codec::encode_command(cmd))?;

        let mut raw = [0u8; HEADER_WIDTH];
        self.read_exact(&mut raw)?;
        let header = codec::decode_header(&raw)?;

        trace!(
            command = %cmd,
            status = header.status,
            data_size = header.data_size,
            "Received reply header"
        );

        if header.payload_len() > MAX_PAYLOAD {
            return Err(ExporterError::Malformed(format!(
                "{} reply announces {} bytes, limit is {}",
                cmd,
                header.data_size,
                MAX_PAYLOAD
            )));
        }

        self.pending = header.payload_len();

        if !header.is_ok() {
            return Err(ExporterError::PeerStatus {
                command: cmd.as_str(),
                status: header.status,
            });
        }

        Ok(header)
    }

    /// Reads exactly `n` bytes, looping over partial reads.
    pub fn read_payload(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; n];
        self.read_exact(&mut payload)?;
        self.pending = self.pending.saturating_sub(n);
        Ok(payload)
    }

    /// Runs one full round-trip and returns the drained payload.
    pub fn request(&mut self, cmd: Command) -> Result<Vec<u8>> {
        let header = self.exchange(cmd)?;
        self.read_payload(header.payload_len())
    }

    /// Releases the connection. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                debug!("Error while closing natasha session: {}", e);
            }
        }
        self.pending = 0;
    }

    fn stream_mut(&mut self) -> Result<&mut T> {
        self.stream.as_mut().ok_or(ExporterError::ConnectionClosed)
    }

    /// Narrows the transport timeout to what is left of the deadline.
    fn arm(&mut self) -> Result<&mut T> {
        let deadline = self.deadline;
        let stream = self.stream_mut()?;
        if let Some(deadline) = deadline {
            stream
                .set_io_timeout(remaining(deadline)?)
                .map_err(map_io_error)?;
        }
        Ok(stream)
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.arm()?.write(buf) {
                Ok(0) => return Err(ExporterError::ConnectionClosed),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(map_io_error(e)),
            }
        }
        self.arm()?.flush().map_err(map_io_error)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.arm()?.read(&mut buf[filled..]) {
                Ok(0) => return Err(ExporterError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(map_io_error(e)),
            }
        }
        Ok(())
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn remaining(deadline: Instant) -> Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(ExporterError::Timeout);
    }
    Ok(left)
}

fn map_io_error(err: io::Error) -> ExporterError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ExporterError::Timeout,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ExporterError::ConnectionClosed,
        _ => ExporterError::IoError(err),
    }
}
