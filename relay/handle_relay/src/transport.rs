// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Connections between a requester and a worker hosted in another process.
//!
//! On Unix a channel is a `SOCK_SEQPACKET` socket, and handles travel with
//! each message as `SCM_RIGHTS` ancillary data. On Windows a channel is a
//! pair of anonymous pipes, and handles are exchanged by value with
//! `DuplicateHandle` against the peer process.

mod unix;
mod windows;

#[cfg(unix)]
use unix as sys;
#[cfg(windows)]
use windows as sys;

pub use sys::Channel;

pub(crate) use sys::INVALID_PARAMETER;
#[cfg(windows)]
pub(crate) use windows::adopt_transferred;
