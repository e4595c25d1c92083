// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(unix)]
// UNSAFETY: Calls to sendmsg and recvmsg to pass file descriptors.
#![allow(unsafe_code)]

use pal::unix::while_eintr;
use socket2::Domain;
use socket2::Socket;
use socket2::Type;
use std::io;
use std::io::IoSlice;
use std::io::IoSliceMut;
use std::os::unix::prelude::*;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;

pub(crate) const INVALID_PARAMETER: i32 = libc::EINVAL;

/// The most descriptors carried by one message.
const MAX_FDS: usize = 4;

/// A message-oriented connection to a peer that can carry file descriptors.
#[derive(Debug)]
pub struct Channel {
    socket: Socket,
}

#[repr(C)]
struct CmsgScmRights {
    hdr: libc::cmsghdr,
    fds: [RawFd; MAX_FDS],
}

impl Channel {
    /// Creates a connected pair of channels.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = Socket::pair(Domain::UNIX, Type::SEQPACKET, None)?;
        Ok((Self { socket: a }, Self { socket: b }))
    }

    /// Spawns `command` with the peer end of a new channel as its standard
    /// input. The child's standard output is discarded.
    pub fn spawn_peer(mut command: Command) -> io::Result<(Self, Child)> {
        let (ours, theirs) = Socket::pair(Domain::UNIX, Type::SEQPACKET, None)?;
        let child = command
            .stdin(Stdio::from(OwnedFd::from(theirs)))
            .stdout(Stdio::null())
            .spawn()?;
        // Close our copy of the child's end so that its exit is seen as EOF.
        drop(command);
        Ok((Self { socket: ours }, child))
    }

    /// Opens the channel a parent passed with [`Self::spawn_peer`].
    pub fn from_stdio() -> io::Result<Self> {
        let socket = Socket::from(pal::duplicate(io::stdin().as_fd())?);
        if socket.r#type()? != Type::SEQPACKET {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "standard input is not a seqpacket socket",
            ));
        }
        Ok(Self { socket })
    }

    /// Sends one message along with `fds`.
    // x86_64-unknown-linux-musl targets have a different type defn for
    // `libc::cmsghdr`, hence why these lints are being suppressed.
    #[allow(clippy::needless_update)]
    pub fn send(&mut self, msg: &[u8], fds: &[BorrowedFd<'_>]) -> io::Result<()> {
        assert!(fds.len() <= MAX_FDS);
        let mut cmsg = CmsgScmRights {
            hdr: libc::cmsghdr {
                cmsg_level: libc::SOL_SOCKET,
                cmsg_type: libc::SCM_RIGHTS,
                cmsg_len: (size_of::<libc::cmsghdr>() + size_of_val(fds)) as _,

                ..{
                    // SAFETY: type has no invariants
                    unsafe { std::mem::zeroed() }
                }
            },
            fds: [0; MAX_FDS],
        };
        for (fdi, fdo) in fds.iter().zip(cmsg.fds.iter_mut()) {
            *fdo = fdi.as_raw_fd();
        }

        let iov = [IoSlice::new(msg)];
        // SAFETY: type has no invariants
        let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
        hdr.msg_iov = iov.as_ptr() as *mut libc::iovec;
        hdr.msg_iovlen = 1;
        if !fds.is_empty() {
            hdr.msg_control = std::ptr::from_mut(&mut cmsg).cast::<libc::c_void>();
            hdr.msg_controllen = cmsg.hdr.cmsg_len;
        }
        let n = while_eintr(|| {
            // SAFETY: calling with appropriately initialized buffers. The
            // descriptors are borrowed for the duration of the call.
            let n = unsafe { libc::sendmsg(self.socket.as_raw_fd(), &hdr, libc::MSG_NOSIGNAL) };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        })?;
        if n != msg.len() {
            return Err(io::ErrorKind::WriteZero.into());
        }
        Ok(())
    }

    /// Receives the next message into `buf`, returning its length and the
    /// descriptors that came with it. Returns `None` when the peer has
    /// closed the connection.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, Vec<OwnedFd>)>> {
        assert!(!buf.is_empty());
        let mut iov = IoSliceMut::new(buf);
        // SAFETY: type has no invariants
        let mut cmsg: CmsgScmRights = unsafe { std::mem::zeroed() };
        // SAFETY: type has no invariants
        let mut hdr: libc::msghdr = unsafe { std::mem::zeroed() };
        hdr.msg_iov = std::ptr::from_mut(&mut iov).cast::<libc::iovec>();
        hdr.msg_iovlen = 1;
        hdr.msg_control = std::ptr::from_mut(&mut cmsg).cast::<libc::c_void>();
        hdr.msg_controllen = size_of_val(&cmsg) as _;

        // Ignore libc misuse of deprecated warning, the flag is not really
        // deprecated.
        #[allow(deprecated)]
        let flags = libc::MSG_CMSG_CLOEXEC;
        let n = while_eintr(|| {
            // SAFETY: calling with properly initialized buffers.
            let n = unsafe { libc::recvmsg(self.socket.as_raw_fd(), &mut hdr, flags) };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        })?;
        if n == 0 {
            return Ok(None);
        }

        let fd_count = if hdr.msg_controllen > 0 {
            if cmsg.hdr.cmsg_level != libc::SOL_SOCKET || cmsg.hdr.cmsg_type != libc::SCM_RIGHTS {
                return Err(io::ErrorKind::InvalidData.into());
            }
            #[allow(clippy::unnecessary_cast)] // cmsg_len is u32 on musl and usize on gnu.
            {
                (cmsg.hdr.cmsg_len as usize - size_of_val(&cmsg.hdr)) / size_of::<RawFd>()
            }
        } else {
            0
        };
        let fds = cmsg.fds[..fd_count]
            .iter()
            .map(|&fd| {
                // SAFETY: according to the contract with the kernel, this
                // fd is now owned by the process.
                unsafe { OwnedFd::from_raw_fd(fd) }
            })
            .collect::<Vec<_>>();

        // Check for truncation only after taking ownership of the fds.
        #[allow(deprecated)]
        if hdr.msg_flags & (libc::MSG_TRUNC | libc::MSG_CTRUNC) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "relay message truncated",
            ));
        }
        Ok(Some((n, fds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::io::Write;
    use test_with_tracing::test;

    #[test]
    fn passes_descriptors() {
        let (mut a, mut b) = Channel::pair().unwrap();
        let (mut read, write) = pal::pipe_pair().unwrap();
        a.send(b"hello", &[write.as_fd()]).unwrap();
        drop(write);

        let mut buf = [0; 16];
        let (n, fds) = b.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(fds.len(), 1);
        let mut write = std::fs::File::from(fds.into_iter().next().unwrap());
        write.write_all(b"through").unwrap();
        drop(write);

        let mut got = String::new();
        read.read_to_string(&mut got).unwrap();
        assert_eq!(got, "through");
    }

    #[test]
    fn eof_after_peer_closes() {
        let (mut a, b) = Channel::pair().unwrap();
        drop(b);
        let mut buf = [0; 16];
        assert!(a.recv(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let (mut a, mut b) = Channel::pair().unwrap();
        let (_read, write) = pal::pipe_pair().unwrap();
        a.send(&[1; 32], &[write.as_fd()]).unwrap();
        let mut buf = [0; 8];
        let err = b.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
