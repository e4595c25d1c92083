// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hands a file and a start event to a worker, which runs deferred work on
//! the file once the event is signaled and reports back through a
//! completion event.
//!
//! The worker never adopts the caller's handles. It duplicates them,
//! creates its own completion event, and returns a duplicate of that event
//! to the caller right away. The work runs later on the platform thread pool
//! (see [`pal::wait_once`]), and the worker's record of the request is
//! dropped exactly once afterwards, which is what signals completion.
//!
//! ```text
//! Requester                         Worker
//!   register_work(file, start) ───▶ duplicate, create completion,
//!                              ◀─── wait on start, return completion
//!   write payload
//!   signal start ────────────────▶ (pool thread) write payload
//!                                   drop request ──▶ signal completion
//!   wait for completion ◀──────────
//! ```
//!
//! The worker can run in the same process ([`Worker`]) or in another one,
//! reached over a [`transport::Channel`] ([`RemoteWorker`] and
//! [`serve_connection`]).

mod error;
pub mod protocol;
mod remote;
mod request;
mod requester;
mod scheduler;
pub mod transport;
mod worker;

pub use error::ProtocolError;
pub use error::RegisterError;
pub use error::RequestError;
pub use error::ServeError;
pub use remote::serve_connection;
pub use remote::RemoteWorker;
pub use requester::Registration;
pub use requester::Requester;
pub use requester::RequesterConfig;
pub use worker::Worker;
pub use worker::WorkerConfig;
pub use worker::WorkerStats;

use pal_event::Event;
use std::fs::File;
use std::sync::Arc;

/// A service that accepts deferred work.
pub trait WorkService {
    /// Registers work on `file` that runs once `start` is signaled.
    ///
    /// Returns a new event that is signaled exactly once, when the worker is
    /// done with the request. Both inputs remain owned by the caller and may
    /// be closed as soon as this returns.
    ///
    /// The work appends to `file` if it can seek and otherwise writes at its
    /// current position, so pipes are accepted too.
    fn register_work(&self, file: &File, start: &Event) -> Result<Event, RegisterError>;
}

impl<T: WorkService + ?Sized> WorkService for &T {
    fn register_work(&self, file: &File, start: &Event) -> Result<Event, RegisterError> {
        (**self).register_work(file, start)
    }
}

impl<T: WorkService + ?Sized> WorkService for Arc<T> {
    fn register_work(&self, file: &File, start: &Event) -> Result<Event, RegisterError> {
        (**self).register_work(file, start)
    }
}
