// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(unix)]

use crate::CancelAttempt;
use pal::unix::pthread;
use pal::unix::pthread::Pthread;
use std::io;

pub(crate) const OPERATION_ABORTED: i32 = libc::ECANCELED;

#[derive(Debug)]
pub(crate) struct OwnerThread(Pthread);

impl OwnerThread {
    pub fn current() -> io::Result<Self> {
        pthread::install_interrupt_handler()?;
        Ok(Self(Pthread::current()))
    }

    pub fn is_current(&self) -> bool {
        self.0 == Pthread::current()
    }

    /// Interrupts the owner's blocking system call, if it is in one.
    ///
    /// There is no way to tell whether the signal landed inside the call or
    /// just before it, so success is always reported as [`CancelAttempt::Retry`]
    /// and the caller keeps signaling while the call is still pending.
    pub fn cancel(&self) -> CancelAttempt {
        match pthread::interrupt(&self.0) {
            Ok(()) => CancelAttempt::Retry,
            Err(err) => CancelAttempt::Failed(err),
        }
    }
}
