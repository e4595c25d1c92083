// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// An error registering work with a worker.
///
/// When registration fails no work is scheduled and every handle duplicated
/// along the way has already been closed.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("failed to duplicate the resource handle")]
    DuplicateResource(#[source] io::Error),
    #[error("failed to duplicate the start event")]
    DuplicateStart(#[source] io::Error),
    #[error("failed to create the completion event")]
    CreateCompletion(#[source] io::Error),
    #[error("failed to schedule the start wait")]
    Schedule(#[source] io::Error),
    #[error("failed to open the requesting process")]
    OpenRequester(#[source] io::Error),
    #[error("connection is bound to process {bound}, not {requested}")]
    UnexpectedRequester { bound: u32, requested: u32 },
    #[error("transport failure")]
    Transport(#[source] io::Error),
    #[error("protocol violation")]
    Protocol(#[source] ProtocolError),
    #[error("the remote worker rejected the registration")]
    Remote(#[source] io::Error),
}

impl RegisterError {
    /// The OS error code reported to a remote requester for this failure.
    pub(crate) fn status(&self) -> i32 {
        let err = match self {
            RegisterError::DuplicateResource(err)
            | RegisterError::DuplicateStart(err)
            | RegisterError::CreateCompletion(err)
            | RegisterError::Schedule(err)
            | RegisterError::OpenRequester(err)
            | RegisterError::Transport(err)
            | RegisterError::Remote(err) => err.raw_os_error(),
            RegisterError::Protocol(_) | RegisterError::UnexpectedRequester { .. } => None,
        };
        err.filter(|&code| code != 0)
            .unwrap_or(crate::transport::INVALID_PARAMETER)
    }
}

/// A malformed message on a relay connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad message magic {0:#x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("expected {expected} handles, received {actual}")]
    MissingHandles { expected: usize, actual: usize },
    #[error("expected a {expected} byte message, received {actual} bytes")]
    BadLength { expected: usize, actual: usize },
}

/// An error running a request end to end.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to create the start event")]
    CreateStart(#[source] io::Error),
    #[error("registration failed")]
    Register(#[source] RegisterError),
    #[error("failed to write the request payload")]
    WritePayload(#[source] io::Error),
    #[error("work did not complete within {0:?}")]
    TimedOut(Duration),
}

/// An error that ends a served relay connection.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("transport failure")]
    Transport(#[source] io::Error),
    #[error("protocol violation")]
    Protocol(#[source] ProtocolError),
}
