//! Plain TCP stream for the checkin request.
//!
//! Implements [`HttpTransport`] over `std::net::TcpStream`, which ESP-IDF
//! backs with lwIP sockets, so the same code runs on both targets. After
//! connecting the socket is switched to non-blocking mode: `read` returns
//! 0 while nothing is buffered and the checkin client paces the polling.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, warn};

use crate::app::ports::HttpTransport;
use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    /// The peer closed its side (read returned EOF).
    peer_closed: bool,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl HttpTransport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.stop();
        let addrs = (host, port).to_socket_addrs().map_err(|e| {
            warn!("TCP: cannot resolve {}: {}", host, e);
            TransportError::ConnectFailed
        })?;

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream
                        .set_nonblocking(true)
                        .map_err(|_| TransportError::ConnectFailed)?;
                    let _ = stream.set_nodelay(true);
                    debug!("TCP: connected to {}", addr);
                    self.stream = Some(stream);
                    self.peer_closed = false;
                    return Ok(());
                }
                Err(e) => debug!("TCP: {} refused: {}", addr, e),
            }
        }
        warn!("TCP: could not reach {}:{}", host, port);
        Err(TransportError::ConnectFailed)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stream = self.stream()?;
        loop {
            match stream.write(data) {
                Ok(n) => return Ok(n),
                // Send buffer full: hand back a short write.
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("TCP: write failed: {}", e);
                    return Err(TransportError::WriteFailed);
                }
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.peer_closed {
            return Ok(0);
        }
        let stream = self.stream()?;
        match stream.read(buf) {
            Ok(0) => {
                self.peer_closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                self.peer_closed = true;
                Ok(0)
            }
            Err(e) => {
                warn!("TCP: read failed: {}", e);
                Err(TransportError::ReadFailed)
            }
        }
    }

    fn connected(&self) -> bool {
        self.stream.is_some() && !self.peer_closed
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.peer_closed = false;
    }
}
