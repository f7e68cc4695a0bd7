//! Raw link-layer packet channel.
//!
//! [`MonitorSocket`] binds an `AF_PACKET` socket to a named interface and
//! moves whole frames in and out without interpreting them. Receives are
//! bounded by a microsecond deadline through `select(2)`; the engine never
//! issues an unbounded wait. The [`PacketLink`] trait is the seam the
//! engine is tested through.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

/// `ETH_P_ALL`: receive every protocol the interface delivers.
pub const ETH_P_ALL: u16 = 0x0003;

/// Result of a bounded receive.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A frame of this many octets was copied into the caller's buffer
    /// (truncated to the buffer when longer).
    Frame(usize),
    /// The deadline passed with nothing readable.
    TimedOut,
}

/// A link that can move whole frames with a bounded receive.
pub trait PacketLink {
    /// Wait up to `deadline_usec` microseconds (values ≤ 0 poll) for a
    /// frame. Socket failures are errors; an empty window is `TimedOut`.
    fn recv(&mut self, buf: &mut [u8], deadline_usec: i64) -> io::Result<RecvOutcome>;

    /// Transmit one complete frame. Short writes are retried with an
    /// advanced pointer; any OS error fails the send.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// An `AF_PACKET` raw socket bound to one interface.
///
/// The descriptor is closed on drop, so the handle is released on every
/// exit path of its owner.
#[derive(Debug)]
pub struct MonitorSocket {
    fd: RawFd,
}

impl MonitorSocket {
    /// Open a raw packet socket and bind it to `if_name` at `protocol`
    /// (normally [`ETH_P_ALL`]).
    ///
    /// Fails when the socket cannot be created (typically missing
    /// CAP_NET_RAW), the interface does not exist, or the bind is refused.
    pub fn open(if_name: &str, protocol: u16) -> io::Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol.to_be() as i32) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let socket = Self { fd };

        let name = CString::new(if_name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name"))?;
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("interface {if_name} not found"),
            ));
        }

        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
        sll.sll_ifindex = ifindex as i32;
        sll.sll_protocol = protocol.to_be();

        let rc = unsafe {
            libc::bind(
                socket.fd,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(socket)
    }
}

impl PacketLink for MonitorSocket {
    fn recv(&mut self, buf: &mut [u8], deadline_usec: i64) -> io::Result<RecvOutcome> {
        let deadline = deadline_usec.max(0);
        let mut tv = libc::timeval {
            tv_sec: (deadline / 1_000_000) as libc::time_t,
            tv_usec: (deadline % 1_000_000) as libc::suseconds_t,
        };

        let mut rfds: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut rfds);
            libc::FD_SET(self.fd, &mut rfds);
        }

        let ready = unsafe {
            libc::select(
                self.fd + 1,
                &mut rfds,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut tv,
            )
        };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 {
            return Ok(RecvOutcome::TimedOut);
        }

        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(RecvOutcome::Frame(n as usize))
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut rest = frame;
        while !rest.is_empty() {
            let n =
                unsafe { libc::write(self.fd, rest.as_ptr() as *const libc::c_void, rest.len()) };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            rest = &rest[n as usize..];
        }
        Ok(())
    }
}

impl Drop for MonitorSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
