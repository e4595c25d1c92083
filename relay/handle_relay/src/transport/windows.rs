// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(windows)]
// UNSAFETY: Adopting handle values that the peer moved into this process.
#![expect(unsafe_code)]

use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::windows::prelude::*;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use winapi::shared::winerror::ERROR_INVALID_PARAMETER;

pub(crate) const INVALID_PARAMETER: i32 = ERROR_INVALID_PARAMETER as i32;

/// A message-oriented connection to a peer over a pair of anonymous pipes.
///
/// Each message is framed with a 32-bit length.
#[derive(Debug)]
pub struct Channel {
    read: File,
    write: File,
}

impl Channel {
    /// Creates a connected pair of channels.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a_read, b_write) = pal::pipe_pair()?;
        let (b_read, a_write) = pal::pipe_pair()?;
        Ok((
            Self {
                read: a_read,
                write: a_write,
            },
            Self {
                read: b_read,
                write: b_write,
            },
        ))
    }

    /// Spawns `command` with the peer end of a new channel as its standard
    /// input and output.
    pub fn spawn_peer(mut command: Command) -> io::Result<(Self, Child)> {
        let (child_read, write) = pal::pipe_pair()?;
        let (read, child_write) = pal::pipe_pair()?;
        let child = command
            .stdin(Stdio::from(child_read))
            .stdout(Stdio::from(child_write))
            .spawn()?;
        // Close our copies of the child's ends so that its exit is seen as
        // EOF.
        drop(command);
        Ok((Self { read, write }, child))
    }

    /// Opens the channel a parent passed with [`Self::spawn_peer`].
    pub fn from_stdio() -> io::Result<Self> {
        let read = pal::duplicate(io::stdin().as_handle())?;
        let write = pal::duplicate(io::stdout().as_handle())?;
        Ok(Self {
            read: read.into(),
            write: write.into(),
        })
    }

    /// Sends one message.
    pub fn send(&mut self, msg: &[u8]) -> io::Result<()> {
        let len = u32::try_from(msg.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))?;
        self.write.write_all(&len.to_ne_bytes())?;
        self.write.write_all(msg)?;
        self.write.flush()
    }

    /// Receives the next message into `buf`, returning its length. Returns
    /// `None` when the peer has closed the connection.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut len = [0; 4];
        let mut filled = 0;
        while filled < len.len() {
            match self.read.read(&mut len[filled..])? {
                0 if filled == 0 => return Ok(None),
                0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                n => filled += n,
            }
        }
        let len = u32::from_ne_bytes(len) as usize;
        let Some(buf) = buf.get_mut(..len) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "relay message truncated",
            ));
        };
        self.read.read_exact(buf)?;
        Ok(Some(len))
    }
}

/// Takes ownership of a handle that the peer moved into this process with
/// `DUPLICATE_CLOSE_SOURCE`.
pub(crate) fn adopt_transferred(value: u64) -> io::Result<OwnedHandle> {
    if value == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "peer returned a null handle",
        ));
    }
    // SAFETY: the peer duplicated this handle into our handle table on our
    // behalf and nothing else in this process refers to it.
    Ok(unsafe { OwnedHandle::from_raw_handle(value as usize as RawHandle) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_with_tracing::test;

    #[test]
    fn round_trips_messages() {
        let (mut a, mut b) = Channel::pair().unwrap();
        a.send(b"hello").unwrap();
        b.send(b"world!").unwrap();
        let mut buf = [0; 16];
        let n = b.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"hello");
        let n = a.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"world!");
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
        a.send(&[1; 32]).unwrap();
        let mut buf = [0; 8];
        let err = b.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
