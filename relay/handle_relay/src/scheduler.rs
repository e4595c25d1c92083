// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs registered work on the platform thread pool once its start event is
//! signaled.

use crate::request::WorkRequest;
use crate::worker::WorkerShared;
use pal::WaitResult;
use std::fs::File;
use std::io;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// How a scheduled request ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done,
    Failed,
    Aborted,
}

/// Waits on the request's start event without blocking the caller.
///
/// The request is owned by the wait from here on. It is dropped, signaling
/// its completion, exactly once: after the work runs, after the wait ends
/// without a signal, or right away if the wait cannot be registered.
pub(crate) fn schedule(request: WorkRequest, worker: Arc<WorkerShared>) -> io::Result<()> {
    let id = request.id;
    let timeout = worker.config.start_timeout;
    pal::wait_once(request, timeout, move |request, result| {
        run(request, result, &worker)
    })?;
    tracing::debug!(request_id = id, ?timeout, "scheduled start wait");
    Ok(())
}

fn run(mut request: WorkRequest, result: WaitResult, worker: &WorkerShared) {
    let id = request.id;
    let outcome = match result {
        WaitResult::Signaled => {
            // The Unix wait pool observes readiness without consuming it.
            let _ = request.start.try_wait();
            let work = std::panic::catch_unwind(AssertUnwindSafe(|| {
                append(&mut request.resource, &worker.config.payload)
            }));
            match work {
                Ok(Ok(())) => {
                    tracing::info!(request_id = id, "work complete");
                    Outcome::Done
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        request_id = id,
                        error = &err as &dyn std::error::Error,
                        "work failed"
                    );
                    Outcome::Failed
                }
                Err(_) => {
                    tracing::error!(request_id = id, "work panicked");
                    Outcome::Failed
                }
            }
        }
        result => {
            tracing::warn!(
                request_id = id,
                ?result,
                "start wait ended without a signal, skipping work"
            );
            Outcome::Aborted
        }
    };
    worker.record(outcome);
    drop(request);
}

/// Writes `payload` at the end of `resource`, or at its current position if
/// it cannot seek (a pipe, say).
fn append(resource: &mut File, payload: &[u8]) -> io::Result<()> {
    match resource.seek(SeekFrom::End(0)) {
        Ok(_) => {}
        Err(err) if is_unseekable(&err) => {}
        Err(err) => return Err(err),
    }
    resource.write_all(payload)?;
    resource.flush()
}

#[cfg(unix)]
fn is_unseekable(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESPIPE)
}

#[cfg(windows)]
fn is_unseekable(err: &io::Error) -> bool {
    use winapi::shared::winerror::ERROR_INVALID_FUNCTION;
    use winapi::shared::winerror::ERROR_INVALID_PARAMETER;

    matches!(
        err.raw_os_error().map(|code| code as u32),
        Some(ERROR_INVALID_FUNCTION | ERROR_INVALID_PARAMETER)
    )
}
