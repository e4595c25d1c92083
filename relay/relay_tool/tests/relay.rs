// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs `relay_tool request` end to end, with the worker in a child process
//! and in process.

use std::process::Command;
use std::process::Output;
use test_with_tracing::test;

const DEFAULT_CONTENTS: &str = "Hello from the requester!\nHello from the worker!\n";

fn relay_tool(args: &[&str], path: &std::path::Path) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_relay_tool"))
        .arg("request")
        .arg(path)
        .args(args)
        .env("RELAY_LOG", "debug")
        .output()
        .unwrap();
    tracing::info!(stderr = %String::from_utf8_lossy(&output.stderr), "relay_tool finished");
    output
}

#[test]
fn request_through_worker_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.txt");
    let output = relay_tool(&[], &path);
    assert!(output.status.success(), "{:?}", output.status);
    assert_eq!(String::from_utf8(output.stdout).unwrap(), DEFAULT_CONTENTS);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONTENTS);
}

#[test]
fn request_in_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.txt");
    let output = relay_tool(&["--in-process"], &path);
    assert!(output.status.success(), "{:?}", output.status);
    assert_eq!(String::from_utf8(output.stdout).unwrap(), DEFAULT_CONTENTS);
}

#[test]
fn worker_process_uses_given_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.txt");
    let output = relay_tool(
        &[
            "--payload",
            "first\n",
            "--worker-payload",
            "second\n",
            "--timeout-ms",
            "10000",
        ],
        &path,
    );
    assert!(output.status.success(), "{:?}", output.status);
    assert_eq!(String::from_utf8(output.stdout).unwrap(), "first\nsecond\n");
}

#[test]
fn request_fails_for_unwritable_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("relay.txt");
    let output = relay_tool(&[], &path);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
