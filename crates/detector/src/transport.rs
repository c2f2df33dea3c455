#![deny(unsafe_code)]

//! Kernel event transport seam.
//!
//! The real transport is a raw `AF_NETLINK`/`NETLINK_CONNECTOR` socket,
//! which needs `CAP_NET_ADMIN`. Everything above this module talks to the
//! [`EventTransport`] trait so tests can feed synthetic datagrams without
//! privileged I/O.

use crate::codec::CN_IDX_PROC;
use crate::error::ConnectError;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Byte-level access to the kernel event socket.
///
/// `recv` is expected to be non-blocking: it returns
/// [`io::ErrorKind::WouldBlock`] when no datagram is ready, which is what
/// lets the reader loop observe its stop flag with bounded latency.
pub trait EventTransport: Send {
    /// Send one control frame to the kernel.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`, returning its length.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The real thing: a netlink socket bound to the cn_proc multicast group.
#[derive(Debug)]
pub struct ProcConnectorSocket {
    fd: OwnedFd,
}

impl ProcConnectorSocket {
    /// Open and bind the connector socket.
    ///
    /// EPERM/EACCES (no `CAP_NET_ADMIN`) is classified as
    /// [`ConnectError::PermissionDenied`] so the caller can fall back to
    /// polling; any other failure is [`ConnectError::Unavailable`].
    pub fn open() -> Result<Self, ConnectError> {
        #[allow(unsafe_code)]
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::NETLINK_CONNECTOR,
            )
        };
        if raw < 0 {
            return Err(classify(io::Error::last_os_error()));
        }
        #[allow(unsafe_code)]
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr = sockaddr_nl_zeroed();
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = CN_IDX_PROC;

        #[allow(unsafe_code)]
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(classify(io::Error::last_os_error()));
        }

        Ok(Self { fd })
    }
}

impl EventTransport for ProcConnectorSocket {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        // Destination is the kernel: nl_pid 0, no groups.
        let mut addr = sockaddr_nl_zeroed();
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        #[allow(unsafe_code)]
        let sent = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                frame.as_ptr().cast(),
                frame.len(),
                0,
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        if sent as usize != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write on netlink socket",
            ));
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        #[allow(unsafe_code)]
        let got = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
            )
        };
        if got < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(got as usize)
    }
}

fn classify(err: io::Error) -> ConnectError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ConnectError::PermissionDenied(err),
        _ => ConnectError::Unavailable(err),
    }
}

fn sockaddr_nl_zeroed() -> libc::sockaddr_nl {
    // Zero-initialised; only nl_family and nl_groups are meaningful here
    // and the padding must stay zero.
    #[allow(unsafe_code)]
    unsafe {
        std::mem::zeroed()
    }
}
