// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::SyscallResult;
use std::fs::File;
use std::io::Result;
use std::os::unix::prelude::*;

/// Creates a connected pair of pipes, returning (read, write).
///
/// Both ends are blocking and close-on-exec.
pub fn pair() -> Result<(File, File)> {
    let mut fds = [0; 2];
    // SAFETY: calling C APIs as documented, with no special requirements.
    unsafe {
        #[cfg(target_os = "linux")]
        {
            // Use pipe2 to set O_CLOEXEC atomically with pipe creation.
            libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC).syscall_result()?;
        }
        #[cfg(not(target_os = "linux"))]
        {
            libc::pipe(fds.as_mut_ptr()).syscall_result()?;
        }
    }
    // SAFETY: the descriptors were just created and are owned by this process.
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    #[cfg(not(target_os = "linux"))]
    for file in [&read, &write] {
        // SAFETY: the fd is owned; FD_CLOEXEC only affects inheritance.
        unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) }
            .syscall_result()?;
    }
    Ok((read, write))
}
