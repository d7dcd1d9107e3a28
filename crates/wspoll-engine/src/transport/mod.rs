//! Byte-stream transports.
//!
//! The engine only needs a non-blocking `Read + Write` stream with a pollable
//! descriptor. Plain TCP and Unix sockets are provided; a TLS stream plugs in
//! by implementing the same trait.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

pub trait Transport: Read + Write + Send {
    /// Descriptor handed to the readiness selector.
    fn raw_handle(&self) -> RawFd;

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Shut down both directions. The descriptor itself closes on drop.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Printable remote address, if the transport has one.
    fn peer_addr(&self) -> Option<String> {
        None
    }
}

impl Transport for TcpStream {
    fn raw_handle(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer_addr(&self) -> Option<String> {
        TcpStream::peer_addr(self).ok().map(|a| a.to_string())
    }
}

impl Transport for UnixStream {
    fn raw_handle(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }

    fn peer_addr(&self) -> Option<String> {
        let addr = UnixStream::peer_addr(self).ok()?;
        addr.as_pathname().map(|p| p.display().to_string())
    }
}
