// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Crate for defining tests that have tracing output.
//!
//! Relay callbacks run on pool threads, so output includes thread names and
//! each test body runs inside a span named after the test.

#[cfg(test)]
extern crate self as test_with_tracing;

pub use test_with_tracing_macro::test;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Environment variable holding a [`Targets`] filter for test output.
pub const FILTER_VAR: &str = "RELAY_TEST_LOG";

#[doc(hidden)]
/// Initializes `tracing` for tests.
pub fn init() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let targets = std::env::var(FILTER_VAR)
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .and_then(|var| var.parse().ok())
            .unwrap_or_else(|| Targets::new().with_default(LevelFilter::DEBUG));
        tracing_subscriber::fmt()
            .compact()
            .with_ansi(false) // avoid polluting logs with escape sequences
            .with_thread_names(true)
            .log_internal_errors(true)
            .with_test_writer()
            .with_max_level(LevelFilter::TRACE)
            .finish()
            .with(targets)
            .init();
    });
}

#[doc(hidden)]
/// Enters a span covering the body of the test `name`.
pub fn enter_test(name: &'static str) -> tracing::span::EnteredSpan {
    tracing::info_span!("test", name).entered()
}

#[cfg(test)]
mod tests {
    use super::test;

    #[test]
    fn test_it() {
        tracing::info!("should show tracing output");
        log::info!("should show log output");
    }

    #[test]
    fn test_with_return() -> Result<(), Box<dyn std::error::Error>> {
        tracing::info!("ok");
        Ok(())
    }
}
