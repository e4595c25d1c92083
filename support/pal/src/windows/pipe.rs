// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::File;
use std::io;
use std::os::windows::prelude::*;
use std::ptr::null_mut;
use winapi::um::namedpipeapi;

/// Creates a pair of pipe files, returning (read, write).
///
/// These files are opened _without_ FILE_FLAG_OVERLAPPED, so reads and writes
/// on them are synchronous and can be cancelled with `CancelSynchronousIo`.
pub fn pair() -> io::Result<(File, File)> {
    // SAFETY: calling API as documented.
    unsafe {
        let mut read = null_mut();
        let mut write = null_mut();
        if namedpipeapi::CreatePipe(&mut read, &mut write, null_mut(), 0) == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((File::from_raw_handle(read), File::from_raw_handle(write)))
    }
}
