// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(windows)]
// UNSAFETY: Calls to Win32 functions to duplicate, transfer, and wait on
// handles.
#![expect(unsafe_code)]
#![allow(clippy::undocumented_unsafe_blocks)]

pub mod pipe;
pub mod tp;

use std::io;
use std::io::Error;
use std::io::Result;
use std::os::windows::prelude::*;
use std::ptr::null_mut;
use winapi::shared::minwindef::FALSE;
use winapi::um::handleapi;
use winapi::um::processthreadsapi;
use winapi::um::winnt;

pub trait BorrowedHandleExt: Sized {
    /// Duplicates the handle within the current process. `access` of `None`
    /// keeps the source handle's access rights.
    fn duplicate(&self, inherit: bool, access: Option<u32>) -> Result<OwnedHandle>;
}

impl BorrowedHandleExt for BorrowedHandle<'_> {
    fn duplicate(&self, inherit: bool, access: Option<u32>) -> Result<OwnedHandle> {
        let mut handle = null_mut();
        let options = if access.is_some() {
            0
        } else {
            winnt::DUPLICATE_SAME_ACCESS
        };
        unsafe {
            let process = processthreadsapi::GetCurrentProcess();
            if handleapi::DuplicateHandle(
                process,
                self.as_raw_handle(),
                process,
                &mut handle,
                access.unwrap_or(0),
                inherit.into(),
                options,
            ) == 0
            {
                return Err(Error::last_os_error());
            }
            Ok(OwnedHandle::from_raw_handle(handle))
        }
    }
}

pub(crate) fn duplicate_same_access(handle: BorrowedHandle<'_>) -> Result<OwnedHandle> {
    handle.duplicate(false, None)
}

pub(crate) fn open_handle_count() -> Result<usize> {
    let mut count = 0;
    // SAFETY: the pseudo handle is always valid and `count` is a valid out
    // pointer.
    let r = unsafe {
        processthreadsapi::GetProcessHandleCount(processthreadsapi::GetCurrentProcess(), &mut count)
    };
    if r == 0 {
        return Err(Error::last_os_error());
    }
    Ok(count as usize)
}

/// A handle to another process, opened for exchanging handles with it.
#[derive(Debug)]
pub struct Process(OwnedHandle);

impl Process {
    /// Opens process `pid` with `PROCESS_DUP_HANDLE` access.
    pub fn open_for_duplication(pid: u32) -> Result<Self> {
        unsafe {
            let handle = processthreadsapi::OpenProcess(winnt::PROCESS_DUP_HANDLE, FALSE, pid);
            if handle.is_null() {
                return Err(Error::last_os_error());
            }
            Ok(Self(OwnedHandle::from_raw_handle(handle)))
        }
    }

    /// Returns the current process's id.
    pub fn current_id() -> u32 {
        unsafe { processthreadsapi::GetCurrentProcessId() }
    }

    pub fn id(&self) -> u32 {
        unsafe {
            let pid = processthreadsapi::GetProcessId(self.0.as_raw_handle());
            assert_ne!(pid, 0);
            pid
        }
    }

    /// Duplicates `handle`, a handle value that is valid in this process, into
    /// the current process with the same access rights.
    ///
    /// The kernel validates `handle` against this process's handle table, so
    /// a stale or forged value fails rather than aliasing an unrelated object
    /// in the current process.
    pub fn duplicate_from(&self, handle: u64) -> Result<OwnedHandle> {
        let mut target = null_mut();
        unsafe {
            if handleapi::DuplicateHandle(
                self.0.as_raw_handle(),
                handle as usize as RawHandle,
                processthreadsapi::GetCurrentProcess(),
                &mut target,
                0,
                FALSE,
                winnt::DUPLICATE_SAME_ACCESS,
            ) == 0
            {
                return Err(Error::last_os_error());
            }
            Ok(OwnedHandle::from_raw_handle(target))
        }
    }

    /// Moves `handle` into this process, returning the handle value that is
    /// valid there.
    ///
    /// The local handle is closed whether or not the transfer succeeds.
    pub fn transfer_into(&self, handle: OwnedHandle) -> Result<u64> {
        let mut target = null_mut();
        unsafe {
            if handleapi::DuplicateHandle(
                processthreadsapi::GetCurrentProcess(),
                handle.into_raw_handle(),
                self.0.as_raw_handle(),
                &mut target,
                0,
                FALSE,
                winnt::DUPLICATE_SAME_ACCESS | winnt::DUPLICATE_CLOSE_SOURCE,
            ) == 0
            {
                return Err(Error::last_os_error());
            }
        }
        Ok(target as usize as u64)
    }

    /// Closes `handle` in this process.
    pub fn close_remote(&self, handle: u64) -> Result<()> {
        unsafe {
            if handleapi::DuplicateHandle(
                self.0.as_raw_handle(),
                handle as usize as RawHandle,
                null_mut(),
                null_mut(),
                0,
                FALSE,
                winnt::DUPLICATE_CLOSE_SOURCE,
            ) == 0
            {
                return Err(Error::last_os_error());
            }
        }
        Ok(())
    }
}

impl AsHandle for Process {
    fn as_handle(&self) -> BorrowedHandle<'_> {
        self.0.as_handle()
    }
}

/// Returns a real handle to the calling thread with `access` rights.
///
/// `GetCurrentThread` returns a pseudo handle that means "the calling thread"
/// wherever it is used, so it cannot be used to target this thread from
/// another one.
pub fn current_thread(access: u32) -> io::Result<OwnedHandle> {
    // SAFETY: the pseudo handle is always valid for the calling thread and
    // does not need to be closed.
    let pseudo = unsafe { BorrowedHandle::borrow_raw(processthreadsapi::GetCurrentThread()) };
    pseudo.duplicate(false, Some(access))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::io::Write;

    #[test]
    fn duplicate_survives_original_close() {
        let (mut read, mut write) = pipe::pair().unwrap();
        let dup = duplicate_same_access(write.as_handle()).unwrap();
        write.write_all(b"a").unwrap();
        drop(write);
        let mut dup = std::fs::File::from(dup);
        dup.write_all(b"b").unwrap();
        drop(dup);

        let mut buf = Vec::new();
        read.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"ab");
    }

    #[test]
    fn duplicate_from_self_process() {
        let (_read, write) = pipe::pair().unwrap();
        let process = Process::open_for_duplication(Process::current_id()).unwrap();
        assert_eq!(process.id(), Process::current_id());
        let dup = process
            .duplicate_from(write.as_raw_handle() as usize as u64)
            .unwrap();
        assert_ne!(dup.as_raw_handle(), write.as_raw_handle());
    }

    #[test]
    fn transfer_and_close_remote() {
        let (_read, write) = pipe::pair().unwrap();
        let process = Process::open_for_duplication(Process::current_id()).unwrap();
        let value = process.transfer_into(write.into()).unwrap();
        process.close_remote(value).unwrap();
    }

    #[test]
    fn duplicate_from_invalid_value_fails() {
        let process = Process::open_for_duplication(Process::current_id()).unwrap();
        process.duplicate_from(0x7fff_fff0).unwrap_err();
    }
}
