//! Outbound connections that never block the calling thread.
//!
//! The socket is created non-blocking and `connect` is only started. The
//! owning core registers it for writability; the first writable report
//! ends the handshake, and `TcpStream::take_error` tells success from
//! failure.

use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;

use nix::errno::Errno;
use nix::sys::socket::{
    connect, socket, AddressFamily, SockFlag, SockProtocol, SockType, SockaddrStorage,
};

use nioloop_core::error::{NioError, Result};

/// Start connecting to `addr`. The returned stream is non-blocking and
/// may still be mid-handshake.
pub fn connect_nonblocking(addr: SocketAddr) -> Result<TcpStream> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket(
        family,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        SockProtocol::Tcp,
    )
    .map_err(|e| NioError::Io(e.into()))?;

    match connect(fd.as_raw_fd(), &SockaddrStorage::from(addr)) {
        Ok(()) | Err(Errno::EINPROGRESS) => {}
        Err(e) => return Err(NioError::Io(e.into())),
    }
    Ok(TcpStream::from(fd))
}
