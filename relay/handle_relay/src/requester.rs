// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The requesting side of the relay.

use crate::RequestError;
use crate::WorkService;
use pal_event::Event;
use std::fs::File;
use std::io::Write;
use std::time::Duration;

/// Requester configuration.
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Bytes written to the file before signaling start.
    pub payload: Vec<u8>,
    /// How long to wait for completion. `None` waits forever.
    pub completion_timeout: Option<Duration>,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            payload: b"Hello from the requester!\n".to_vec(),
            completion_timeout: None,
        }
    }
}

impl RequesterConfig {
    /// Sets the bytes written before signaling start.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Bounds the wait for completion.
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = Some(timeout);
        self
    }
}

/// Hands a file to a [`WorkService`] and drives the exchange.
#[derive(Debug)]
pub struct Requester<S> {
    service: S,
    config: RequesterConfig,
}

/// A registration in progress: the start event the requester owns and the
/// completion event the worker returned.
#[derive(Debug)]
pub struct Registration {
    start: Event,
    completion: Event,
}

impl Registration {
    /// Tells the worker to run the work.
    pub fn start(&self) {
        self.start.signal();
    }

    /// The completion event. It is signaled exactly once, when the worker
    /// has finished with the request, whether or not the work succeeded.
    pub fn completion(&self) -> &Event {
        &self.completion
    }

    /// Waits for completion, up to `timeout` if one is given. Returns whether
    /// the work completed.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => self.completion.wait_timeout(timeout),
            None => {
                self.completion.wait();
                true
            }
        }
    }
}

impl<S: WorkService> Requester<S> {
    /// Creates a requester that sends work to `service`.
    pub fn new(service: S, config: RequesterConfig) -> Self {
        Self { service, config }
    }

    /// Registers `file` with the service along with a new start event.
    pub fn register(&self, file: &File) -> Result<Registration, RequestError> {
        let start = Event::new().map_err(RequestError::CreateStart)?;
        let completion = self
            .service
            .register_work(file, &start)
            .map_err(RequestError::Register)?;
        Ok(Registration { start, completion })
    }

    /// Runs one full exchange: registers `file`, writes the payload, signals
    /// start, and waits for the worker to finish.
    pub fn run(&self, file: &mut File) -> Result<(), RequestError> {
        let registration = self.register(file)?;
        tracing::debug!("registered, writing payload");
        file.write_all(&self.config.payload)
            .and_then(|()| file.flush())
            .map_err(RequestError::WritePayload)?;

        registration.start();
        if !registration.wait(self.config.completion_timeout) {
            let timeout = self.config.completion_timeout.unwrap_or_default();
            tracing::warn!(?timeout, "worker did not complete in time");
            return Err(RequestError::TimedOut(timeout));
        }
        tracing::info!("worker completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterError;
    use crate::Worker;
    use crate::WorkerConfig;
    use std::io::Read;
    use std::io::Seek;
    use test_with_tracing::test;

    /// A service that never finishes the work.
    struct Stalled;

    impl WorkService for Stalled {
        fn register_work(&self, _file: &File, _start: &Event) -> Result<Event, RegisterError> {
            Event::new().map_err(RegisterError::CreateCompletion)
        }
    }

    /// A service that refuses every registration.
    struct Refusing;

    impl WorkService for Refusing {
        fn register_work(&self, _file: &File, _start: &Event) -> Result<Event, RegisterError> {
            Err(RegisterError::Remote(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )))
        }
    }

    #[test]
    fn run_appends_both_payloads() {
        let worker = Worker::new(WorkerConfig::default().with_payload("worker\n"));
        let requester = Requester::new(
            worker.clone(),
            RequesterConfig::default()
                .with_payload("requester\n")
                .with_completion_timeout(Duration::from_secs(10)),
        );
        let mut file = tempfile::tempfile().unwrap();
        requester.run(&mut file).unwrap();

        let mut contents = String::new();
        file.rewind().unwrap();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "requester\nworker\n");
    }

    #[test]
    fn run_times_out() {
        let requester = Requester::new(
            Stalled,
            RequesterConfig::default().with_completion_timeout(Duration::from_millis(50)),
        );
        let mut file = tempfile::tempfile().unwrap();
        let err = requester.run(&mut file).unwrap_err();
        assert!(matches!(err, RequestError::TimedOut(_)), "{err:?}");
    }

    #[test]
    fn registration_failure_is_reported() {
        let requester = Requester::new(Refusing, RequesterConfig::default());
        let mut file = tempfile::tempfile().unwrap();
        let err = requester.run(&mut file).unwrap_err();
        assert!(matches!(err, RequestError::Register(_)), "{err:?}");
        assert_eq!(file.metadata().unwrap().len(), 0);
    }
}
