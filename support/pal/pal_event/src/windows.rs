// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(windows)]

use crate::Event;
use std::os::windows::prelude::*;
use std::time::Duration;
use windows_sys::Win32::Foundation;
use windows_sys::Win32::System::Threading;

pub type Inner = OwnedHandle;

impl Event {
    pub(crate) fn new_inner() -> std::io::Result<Self> {
        // SAFETY: passing valid parameters as documented. The event is
        // auto-reset (bManualReset = FALSE) and initially unsignaled.
        let handle = unsafe {
            let handle = Threading::CreateEventW(
                std::ptr::null(),
                false.into(),
                false.into(),
                std::ptr::null(),
            ) as RawHandle;
            if handle.is_null() {
                return Err(std::io::Error::last_os_error());
            }
            OwnedHandle::from_raw_handle(handle)
        };
        Ok(Self(handle))
    }

    pub(crate) fn signal_inner(&self) {
        // SAFETY: passing a valid handle.
        let r = unsafe { Threading::SetEvent(self.0.as_raw_handle()) };
        if r == 0 {
            // This can only fail due to an invalid handle, which can only
            // happen due to some bug in unsafe code.
            panic!("signal failed: {}", std::io::Error::last_os_error());
        }
    }

    fn wait_for(&self, timeout_ms: u32) -> bool {
        // SAFETY: passing a valid handle.
        let r = unsafe { Threading::WaitForSingleObject(self.0.as_raw_handle(), timeout_ms) };
        match r {
            Foundation::WAIT_OBJECT_0 => true,
            Foundation::WAIT_TIMEOUT => false,
            r => {
                // This can only fail due to an invalid handle, which can only
                // happen due to some bug in unsafe code.
                panic!("wait failed ({r:#x}): {}", std::io::Error::last_os_error());
            }
        }
    }

    pub(crate) fn try_wait_inner(&self) -> bool {
        self.wait_for(0)
    }

    pub(crate) fn wait_timeout_inner(&self, timeout: Option<Duration>) -> bool {
        let timeout_ms = match timeout {
            // INFINITE is u32::MAX, so clamp finite waits just below it.
            Some(t) => t
                .as_millis()
                .try_into()
                .unwrap_or(Threading::INFINITE - 1)
                .min(Threading::INFINITE - 1),
            None => Threading::INFINITE,
        };
        self.wait_for(timeout_ms)
    }
}

impl From<OwnedHandle> for Event {
    fn from(handle: OwnedHandle) -> Self {
        Self(handle)
    }
}

impl AsHandle for Event {
    fn as_handle(&self) -> BorrowedHandle<'_> {
        self.0.as_handle()
    }
}

impl From<Event> for OwnedHandle {
    fn from(event: Event) -> OwnedHandle {
        event.0
    }
}
