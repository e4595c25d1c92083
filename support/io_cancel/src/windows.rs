// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(windows)]
// UNSAFETY: Calling CancelSynchronousIo and GetCurrentThreadId.
#![expect(unsafe_code)]

use crate::CancelAttempt;
use std::io;
use std::os::windows::prelude::*;
use winapi::shared::winerror::ERROR_NOT_FOUND;
use winapi::shared::winerror::ERROR_OPERATION_ABORTED;
use winapi::um::ioapiset::CancelSynchronousIo;
use winapi::um::processthreadsapi::GetCurrentThreadId;
use winapi::um::winnt::THREAD_TERMINATE;

pub(crate) const OPERATION_ABORTED: i32 = ERROR_OPERATION_ABORTED as i32;

#[derive(Debug)]
pub(crate) struct OwnerThread {
    handle: OwnedHandle,
    id: u32,
}

impl OwnerThread {
    pub fn current() -> io::Result<Self> {
        // CancelSynchronousIo requires THREAD_TERMINATE.
        let handle = pal::windows::current_thread(THREAD_TERMINATE)?;
        // SAFETY: no requirements.
        let id = unsafe { GetCurrentThreadId() };
        Ok(Self { handle, id })
    }

    pub fn is_current(&self) -> bool {
        // SAFETY: no requirements.
        self.id == unsafe { GetCurrentThreadId() }
    }

    pub fn cancel(&self) -> CancelAttempt {
        // SAFETY: the handle is owned and valid.
        if unsafe { CancelSynchronousIo(self.handle.as_raw_handle()) } != 0 {
            return CancelAttempt::Delivered;
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_NOT_FOUND as i32) {
            // The owner has not issued its call yet, or it already finished.
            CancelAttempt::Retry
        } else {
            CancelAttempt::Failed(err)
        }
    }
}
