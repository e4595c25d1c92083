// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Messages exchanged on a relay connection.
//!
//! Both ends run on the same host, so fields are in native byte order. On
//! Unix the handle fields are zero and the handles travel as `SCM_RIGHTS`
//! ancillary data instead, resource first.

use crate::ProtocolError;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// "HLRY"
pub const MAGIC: u32 = 0x5952_4C48;
pub const VERSION: u16 = 1;

/// Asks the worker to register the requester's resource and start event.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RegisterRequest {
    pub magic: u32,
    pub version: u16,
    pub reserved: u16,
    /// The process in which `file` and `start` are valid.
    pub requester_pid: u32,
    pub reserved2: u32,
    pub file: u64,
    pub start: u64,
}

/// The worker's answer to a [`RegisterRequest`].
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RegisterResponse {
    pub magic: u32,
    /// Zero on success, otherwise the OS error that failed the registration.
    pub status: i32,
    /// The completion handle, valid in the requester's process.
    pub completion: u64,
}

impl RegisterRequest {
    pub fn new(requester_pid: u32, file: u64, start: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            reserved: 0,
            requester_pid,
            reserved2: 0,
            file,
            start,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let request = read_exact::<Self>(buf)?;
        if request.magic != MAGIC {
            return Err(ProtocolError::BadMagic(request.magic));
        }
        if request.version != VERSION {
            return Err(ProtocolError::UnsupportedVersion(request.version));
        }
        Ok(request)
    }
}

impl RegisterResponse {
    pub fn success(completion: u64) -> Self {
        Self {
            magic: MAGIC,
            status: 0,
            completion,
        }
    }

    pub fn failure(status: i32) -> Self {
        Self {
            magic: MAGIC,
            status,
            completion: 0,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let response = read_exact::<Self>(buf)?;
        if response.magic != MAGIC {
            return Err(ProtocolError::BadMagic(response.magic));
        }
        Ok(response)
    }
}

fn read_exact<T: FromBytes>(buf: &[u8]) -> Result<T, ProtocolError> {
    T::read_from_bytes(buf).map_err(|_| ProtocolError::BadLength {
        expected: size_of::<T>(),
        actual: buf.len(),
    })
}

/// Large enough for any message.
pub(crate) const MAX_MESSAGE_SIZE: usize = 64;

const _: () = assert!(size_of::<RegisterRequest>() == 32);
const _: () = assert!(size_of::<RegisterResponse>() == 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_rejects_bad_magic() {
        let mut request = RegisterRequest::new(1, 2, 3);
        request.magic = 0x1234;
        let err = RegisterRequest::parse(request.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic(0x1234)), "{err:?}");
    }

    #[test]
    fn request_rejects_future_version() {
        let mut request = RegisterRequest::new(1, 2, 3);
        request.version = 2;
        let err = RegisterRequest::parse(request.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(2)), "{err:?}");
    }

    #[test]
    fn rejects_short_message() {
        let response = RegisterResponse::success(7);
        let err = RegisterResponse::parse(&response.as_bytes()[..12]).unwrap_err();
        assert!(
            matches!(
                err,
                ProtocolError::BadLength {
                    expected: 16,
                    actual: 12
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn failure_carries_status() {
        let response = RegisterResponse::parse(RegisterResponse::failure(5).as_bytes()).unwrap();
        assert_eq!(response.status, 5);
        assert_eq!(response.completion, 0);
    }
}
