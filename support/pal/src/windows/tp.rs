// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Code to interact with the Windows thread pool.

use crate::AsOsHandle;
use crate::WaitResult;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::io;
use std::os::windows::prelude::*;
use std::panic::AssertUnwindSafe;
use std::ptr::null_mut;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use winapi::shared::minwindef::FILETIME;
use winapi::shared::winerror::WAIT_TIMEOUT;
use winapi::um::threadpoolapiset::CloseThreadpoolWait;
use winapi::um::threadpoolapiset::CreateThreadpoolWait;
use winapi::um::threadpoolapiset::SetThreadpoolWaitEx;
use winapi::um::winbase::WAIT_ABANDONED_0;
use winapi::um::winbase::WAIT_OBJECT_0;
use winapi::um::winnt::PTP_WAIT_CALLBACK;
use winapi::um::winnt::TP_CALLBACK_INSTANCE;
use winapi::um::winnt::TP_WAIT;

/// Wrapper around a threadpool wait object (TP_WAIT).
#[derive(Debug)]
pub struct TpWait(NonNull<TP_WAIT>);

// SAFETY: the inner pointer is just a handle and can be safely used between
// threads.
unsafe impl Send for TpWait {}
// SAFETY: see above.
unsafe impl Sync for TpWait {}

impl TpWait {
    /// Creates a new TP_WAIT.
    ///
    /// # Safety
    /// The caller must ensure it is safe to call `callback` with `context`
    /// whenever the wait is set and satisfied.
    pub unsafe fn new(callback: PTP_WAIT_CALLBACK, context: *mut c_void) -> io::Result<Self> {
        // SAFETY: Caller ensured this is safe.
        let wait = NonNull::new(unsafe { CreateThreadpoolWait(callback, context, null_mut()) })
            .ok_or_else(io::Error::last_os_error)?;
        Ok(Self(wait))
    }

    /// Sets the handle to wait for, with an optional relative timeout.
    ///
    /// # Safety
    ///
    /// `handle` must remain valid until the wait is satisfied or cancelled.
    pub unsafe fn set(&self, handle: RawHandle, timeout: Option<Duration>) {
        let mut due_time = timeout.map(|timeout| {
            // Negative due times are relative, in 100ns units.
            let due_time_100ns = -(timeout.as_nanos() / 100).try_into().unwrap_or(i64::MAX);
            FILETIME {
                dwLowDateTime: due_time_100ns as u32,
                dwHighDateTime: (due_time_100ns >> 32) as u32,
            }
        });
        let due_time = due_time
            .as_mut()
            .map_or(null_mut(), |due_time| std::ptr::from_mut(due_time));
        // SAFETY: The caller ensures this is safe when creating the object in `new`.
        unsafe {
            SetThreadpoolWaitEx(self.0.as_ptr(), handle, due_time, null_mut());
        }
    }
}

impl Drop for TpWait {
    fn drop(&mut self) {
        // SAFETY: the object is no longer in use. Closing from within the
        // wait's own callback is permitted; the pool frees it once the
        // callback returns.
        unsafe {
            CloseThreadpoolWait(self.0.as_ptr());
        }
    }
}

impl WaitResult {
    fn from_win32(result: u32) -> Self {
        match result {
            WAIT_OBJECT_0 => WaitResult::Signaled,
            WAIT_TIMEOUT => WaitResult::TimedOut,
            WAIT_ABANDONED_0 => WaitResult::Abandoned,
            r => WaitResult::Failed(r as i32),
        }
    }
}

/// Shared between the registering thread and the callback. Whichever drops
/// the last reference closes the TP_WAIT.
struct OneShot<T, F> {
    wait: OnceLock<TpWait>,
    state: Mutex<Option<(T, F)>>,
}

pub(crate) fn wait_once<T, F>(object: T, timeout: Option<Duration>, callback: F) -> io::Result<()>
where
    T: AsOsHandle + Send + 'static,
    F: FnOnce(T, WaitResult) + Send + 'static,
{
    let handle = object.as_os_handle().as_raw_handle();
    let one_shot = Arc::new(OneShot {
        wait: OnceLock::new(),
        state: Mutex::new(Some((object, callback))),
    });
    // SAFETY: the context is a strong reference that is only consumed by
    // `one_shot_complete`, which runs at most once because the wait is set
    // only once below.
    let wait = unsafe {
        TpWait::new(
            Some(one_shot_complete::<T, F>),
            Arc::as_ptr(&one_shot).cast_mut().cast(),
        )?
    };
    let wait = one_shot.wait.get_or_init(|| wait);
    let _ = Arc::into_raw(one_shot.clone());
    // SAFETY: `handle` belongs to `object`, which the context keeps alive
    // until the callback takes it.
    unsafe { wait.set(handle, timeout) };
    Ok(())
}

unsafe extern "system" fn one_shot_complete<T, F>(
    _: *mut TP_CALLBACK_INSTANCE,
    context: *mut c_void,
    _: *mut TP_WAIT,
    result: u32,
) where
    T: Send + 'static,
    F: FnOnce(T, WaitResult) + Send + 'static,
{
    // SAFETY: consume the reference leaked in wait_once().
    let one_shot = unsafe { Arc::from_raw(context.cast_const().cast::<OneShot<T, F>>()) };
    let Some((object, callback)) = one_shot.state.lock().take() else {
        return;
    };
    let result = WaitResult::from_win32(result);
    // Unwinding out of an extern "system" function aborts the process.
    if std::panic::catch_unwind(AssertUnwindSafe(|| callback(object, result))).is_err() {
        tracing::error!(?result, "wait callback panicked");
    }
}
