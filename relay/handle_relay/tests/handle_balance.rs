// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Checks that relayed requests leave no handles behind.
//!
//! This lives in its own test binary so that no other test is opening or
//! closing handles while the counts are compared.

use handle_relay::RegisterError;
use handle_relay::Requester;
use handle_relay::RequesterConfig;
use handle_relay::WorkService;
use handle_relay::Worker;
use handle_relay::WorkerConfig;
use pal_event::Event;
use std::fs::File;
use std::time::Duration;
use std::time::Instant;
use test_with_tracing::test;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Handle counts can lag completion slightly: the pool thread closes the
/// last handles after signaling.
fn settle(baseline: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let count = pal::open_handle_count().unwrap();
        if count <= baseline || Instant::now() >= deadline {
            return count;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

struct Refusing;

impl WorkService for Refusing {
    fn register_work(&self, _file: &File, _start: &Event) -> Result<Event, RegisterError> {
        Err(RegisterError::Remote(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        )))
    }
}

#[test]
fn requests_release_all_handles() {
    let worker = Worker::new(WorkerConfig::default());
    let requester = Requester::new(
        &worker,
        RequesterConfig::default().with_completion_timeout(TIMEOUT),
    );

    // Warm up lazily created process state, such as the wait pool thread.
    let mut file = tempfile::tempfile().unwrap();
    requester.run(&mut file).unwrap();
    drop(file);
    assert!(worker.wait_idle_timeout(TIMEOUT));
    let baseline = pal::open_handle_count().unwrap();

    for _ in 0..32 {
        let mut file = tempfile::tempfile().unwrap();
        requester.run(&mut file).unwrap();
    }
    let refused = Requester::new(Refusing, RequesterConfig::default());
    let mut file = tempfile::tempfile().unwrap();
    refused.run(&mut file).unwrap_err();
    drop(file);

    assert!(worker.wait_idle_timeout(TIMEOUT));
    assert_eq!(settle(baseline), baseline);
    assert_eq!(worker.stats().work_done, 33);
}
