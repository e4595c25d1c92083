// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tool for exercising the handle relay from the command line.
//!
//! `relay_tool request <PATH>` spawns `relay_tool serve` as the worker
//! process, connected over its standard input (and, on Windows, output), and
//! relays `PATH` through it.

use anyhow::Context as _;
use clap::Parser;
use handle_relay::transport::Channel;
use handle_relay::RemoteWorker;
use handle_relay::Requester;
use handle_relay::RequesterConfig;
use handle_relay::Worker;
use handle_relay::WorkerConfig;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command line interface for the handle relay.
#[derive(Parser)]
struct CliArgs {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Relays a file through a worker and prints its final contents.
    Request {
        /// The file to relay. It is created or truncated.
        path: PathBuf,

        /// Text the requester writes before signaling start.
        #[clap(long)]
        payload: Option<String>,

        /// Text the worker writes once started.
        #[clap(long)]
        worker_payload: Option<String>,

        /// Give up waiting for the worker after this many milliseconds.
        #[clap(long)]
        timeout_ms: Option<u64>,

        /// Host the worker in this process instead of spawning one.
        #[clap(long)]
        in_process: bool,
    },
    /// Hosts a worker for the requester connected to standard input.
    ///
    /// This is what `request` spawns; it is not useful on its own.
    Serve {
        /// Skip work whose start event is not signaled within this many
        /// milliseconds.
        #[clap(long)]
        start_timeout_ms: Option<u64>,

        /// Text the worker writes once started.
        #[clap(long)]
        payload: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = CliArgs::parse();
    match args.command {
        Command::Request {
            path,
            payload,
            worker_payload,
            timeout_ms,
            in_process,
        } => {
            let mut config = RequesterConfig::default();
            if let Some(payload) = payload {
                config = config.with_payload(payload);
            }
            if let Some(ms) = timeout_ms {
                config = config.with_completion_timeout(Duration::from_millis(ms));
            }
            request(&path, config, worker_payload, in_process)
        }
        Command::Serve {
            start_timeout_ms,
            payload,
        } => {
            let mut config = WorkerConfig::default();
            if let Some(payload) = payload {
                config = config.with_payload(payload);
            }
            if let Some(ms) = start_timeout_ms {
                config = config.with_start_timeout(Duration::from_millis(ms));
            }
            serve(config)
        }
    }
}

/// Logs go to stderr, since the worker's stdout may be its channel.
fn init_tracing() -> anyhow::Result<()> {
    let targets = match std::env::var("RELAY_LOG") {
        Ok(filter) => filter
            .parse::<Targets>()
            .context("failed to parse RELAY_LOG")?,
        Err(_) => Targets::new().with_default(LevelFilter::INFO),
    };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::TRACE)
        .finish()
        .with(targets)
        .init();
    Ok(())
}

fn request(
    path: &Path,
    config: RequesterConfig,
    worker_payload: Option<String>,
    in_process: bool,
) -> anyhow::Result<()> {
    let mut file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    if in_process {
        let mut worker_config = WorkerConfig::default();
        if let Some(payload) = worker_payload {
            worker_config = worker_config.with_payload(payload);
        }
        let worker = Worker::new(worker_config);
        Requester::new(&worker, config)
            .run(&mut file)
            .context("request failed")?;
        worker.wait_idle();
    } else {
        let exe = std::env::current_exe().context("failed to find the current executable")?;
        let mut command = std::process::Command::new(exe);
        command.arg("serve");
        if let Some(payload) = worker_payload {
            command.arg("--payload").arg(payload);
        }
        let (channel, mut child) =
            Channel::spawn_peer(command).context("failed to spawn the worker")?;
        let remote = RemoteWorker::new(channel);
        let result = Requester::new(&remote, config).run(&mut file);
        // Closing the channel tells the worker to exit.
        drop(remote);
        let status = child.wait().context("failed to wait for the worker")?;
        result.context("request failed")?;
        if !status.success() {
            anyhow::bail!("worker exited with {status}");
        }
    }

    let mut contents = Vec::new();
    file.rewind()
        .and_then(|()| file.read_to_end(&mut contents))
        .with_context(|| format!("failed to read back {}", path.display()))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&contents)?;
    stdout.flush()?;
    Ok(())
}

fn serve(config: WorkerConfig) -> anyhow::Result<()> {
    let worker = Worker::new(config);
    let channel = Channel::from_stdio().context("failed to open the requester channel")?;
    let result = handle_relay::serve_connection(&worker, channel);
    if worker.outstanding() != 0 {
        tracing::info!(
            outstanding = worker.outstanding(),
            "waiting for outstanding work"
        );
    }
    worker.wait_idle();
    tracing::info!(stats = ?worker.stats(), "worker exiting");
    result.context("relay session failed")
}
