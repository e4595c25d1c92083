// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Registering work with a worker hosted in another process.

use crate::protocol::RegisterRequest;
use crate::protocol::RegisterResponse;
use crate::protocol::MAX_MESSAGE_SIZE;
use crate::transport::Channel;
use crate::RegisterError;
use crate::ServeError;
use crate::WorkService;
use crate::Worker;
use pal_event::Event;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use zerocopy::IntoBytes;

/// A [`WorkService`] that forwards registrations over a [`Channel`] to a
/// worker running [`serve_connection`].
///
/// Registrations on one connection are sent one at a time.
#[derive(Debug)]
pub struct RemoteWorker {
    channel: Mutex<Channel>,
}

impl RemoteWorker {
    /// Creates a client for the worker at the other end of `channel`.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }
}

impl WorkService for RemoteWorker {
    fn register_work(&self, file: &File, start: &Event) -> Result<Event, RegisterError> {
        let mut channel = self.channel.lock();
        let completion = sys::call(&mut channel, file, start)?;
        tracing::debug!("remote worker accepted registration");
        Ok(completion)
    }
}

fn unexpected_eof() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "worker closed the connection",
    )
}

fn check_status(response: &RegisterResponse) -> Result<(), RegisterError> {
    if response.status != 0 {
        return Err(RegisterError::Remote(io::Error::from_raw_os_error(
            response.status,
        )));
    }
    Ok(())
}

/// Hosts `worker` for the requester at the other end of `channel`.
///
/// Serves registrations until the requester closes the connection. A failed
/// registration is reported to the requester and does not end the session;
/// transport failures and malformed messages do.
///
/// Work already registered keeps running after this returns; use
/// [`Worker::wait_idle`] to wait for it.
pub fn serve_connection(worker: &Worker, mut channel: Channel) -> Result<(), ServeError> {
    let mut server = sys::Server::default();
    let mut served = 0u64;
    while server.serve_one(worker, &mut channel)? {
        served += 1;
    }
    tracing::info!(served, "requester disconnected");
    Ok(())
}

#[cfg(unix)]
mod sys {
    use super::*;
    use crate::ProtocolError;
    use std::os::unix::prelude::*;

    pub(super) fn call(
        channel: &mut Channel,
        file: &File,
        start: &Event,
    ) -> Result<Event, RegisterError> {
        let request = RegisterRequest::new(std::process::id(), 0, 0);
        channel
            .send(request.as_bytes(), &[file.as_fd(), start.as_fd()])
            .map_err(RegisterError::Transport)?;

        let mut buf = [0; MAX_MESSAGE_SIZE];
        let (n, fds) = channel
            .recv(&mut buf)
            .map_err(RegisterError::Transport)?
            .ok_or_else(|| RegisterError::Transport(unexpected_eof()))?;
        let response = RegisterResponse::parse(&buf[..n]).map_err(RegisterError::Protocol)?;
        check_status(&response)?;
        let [completion] = <[OwnedFd; 1]>::try_from(fds).map_err(|fds| {
            RegisterError::Protocol(ProtocolError::MissingHandles {
                expected: 1,
                actual: fds.len(),
            })
        })?;
        Ok(Event::from(completion))
    }

    #[derive(Default)]
    pub(super) struct Server;

    impl Server {
        /// Serves one registration. Returns false at EOF.
        pub fn serve_one(
            &mut self,
            worker: &Worker,
            channel: &mut Channel,
        ) -> Result<bool, ServeError> {
            let mut buf = [0; MAX_MESSAGE_SIZE];
            let Some((n, fds)) = channel.recv(&mut buf).map_err(ServeError::Transport)? else {
                return Ok(false);
            };
            let request = RegisterRequest::parse(&buf[..n]).map_err(ServeError::Protocol)?;
            let [file, start] = <[OwnedFd; 2]>::try_from(fds).map_err(|fds| {
                ServeError::Protocol(ProtocolError::MissingHandles {
                    expected: 2,
                    actual: fds.len(),
                })
            })?;
            tracing::debug!(pid = request.requester_pid, "registration received");

            // The kernel already duplicated the descriptors in transit.
            match worker.register_duplicates(File::from(file), Event::from(start)) {
                Ok(completion) => channel
                    .send(
                        RegisterResponse::success(0).as_bytes(),
                        &[completion.as_fd()],
                    )
                    .map_err(ServeError::Transport)?,
                Err(err) => channel
                    .send(RegisterResponse::failure(err.status()).as_bytes(), &[])
                    .map_err(ServeError::Transport)?,
            }
            Ok(true)
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::*;
    use crate::transport::adopt_transferred;
    use pal::windows::Process;
    use pal::ScopeExit;
    use std::os::windows::prelude::*;

    pub(super) fn call(
        channel: &mut Channel,
        file: &File,
        start: &Event,
    ) -> Result<Event, RegisterError> {
        // The worker duplicates both handles out of this process while this
        // call holds the borrows.
        let request = RegisterRequest::new(
            Process::current_id(),
            file.as_raw_handle() as usize as u64,
            start.as_handle().as_raw_handle() as usize as u64,
        );
        channel
            .send(request.as_bytes())
            .map_err(RegisterError::Transport)?;

        let mut buf = [0; MAX_MESSAGE_SIZE];
        let n = channel
            .recv(&mut buf)
            .map_err(RegisterError::Transport)?
            .ok_or_else(|| RegisterError::Transport(unexpected_eof()))?;
        let response = RegisterResponse::parse(&buf[..n]).map_err(RegisterError::Protocol)?;
        check_status(&response)?;
        let completion = adopt_transferred(response.completion).map_err(RegisterError::Transport)?;
        Ok(Event::from(completion))
    }

    /// Keeps the requester's process open across registrations.
    ///
    /// The first registration binds the connection to the process it names;
    /// registrations naming any other process are rejected.
    #[derive(Default)]
    pub(super) struct Server {
        requester: Option<Process>,
    }

    impl Server {
        fn requester(&mut self, pid: u32) -> Result<&Process, RegisterError> {
            if let Some(bound) = self.requester.as_ref().map(|p| p.id()) {
                if bound != pid {
                    return Err(RegisterError::UnexpectedRequester {
                        bound,
                        requested: pid,
                    });
                }
            }
            let process = match &mut self.requester {
                Some(process) => process,
                slot => slot.insert(
                    Process::open_for_duplication(pid).map_err(RegisterError::OpenRequester)?,
                ),
            };
            Ok(process)
        }

        fn register(
            &mut self,
            worker: &Worker,
            request: &RegisterRequest,
        ) -> Result<(&Process, u64), RegisterError> {
            let process = match self.requester(request.requester_pid) {
                Ok(process) => process,
                Err(err) => return Err(worker.reject(err)),
            };
            let (file, start) = process
                .duplicate_from(request.file)
                .map_err(RegisterError::DuplicateResource)
                .and_then(|file| {
                    let start = process
                        .duplicate_from(request.start)
                        .map_err(RegisterError::DuplicateStart)?;
                    Ok((File::from(file), Event::from(start)))
                })
                .map_err(|err| worker.reject(err))?;
            let completion = worker.register_duplicates(file, start)?;
            // If this fails the work stays registered until its start wait
            // ends.
            let value = process
                .transfer_into(completion.into())
                .map_err(RegisterError::Transport)?;
            Ok((process, value))
        }

        /// Serves one registration. Returns false at EOF.
        pub fn serve_one(
            &mut self,
            worker: &Worker,
            channel: &mut Channel,
        ) -> Result<bool, ServeError> {
            let mut buf = [0; MAX_MESSAGE_SIZE];
            let Some(n) = channel.recv(&mut buf).map_err(ServeError::Transport)? else {
                return Ok(false);
            };
            let request = RegisterRequest::parse(&buf[..n]).map_err(ServeError::Protocol)?;
            tracing::debug!(pid = request.requester_pid, "registration received");

            match self.register(worker, &request) {
                Ok((process, value)) => {
                    // Don't leak the handle into the requester if it never
                    // learns its value.
                    let close = ScopeExit::new(|| {
                        let _ = process.close_remote(value);
                    });
                    channel
                        .send(RegisterResponse::success(value).as_bytes())
                        .map_err(ServeError::Transport)?;
                    close.dismiss();
                }
                Err(err) => {
                    channel
                        .send(RegisterResponse::failure(err.status()).as_bytes())
                        .map_err(ServeError::Transport)?;
                }
            }
            Ok(true)
        }
    }
}
