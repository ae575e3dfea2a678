//! `roadwatch` CLI: replays JSON-lines frame messages and writes JSON-lines
//! detection and annotated-frame events.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam::channel::Receiver;
use roadwatch::clock::SystemClock;
use roadwatch::config::Config;
use roadwatch::dispatch::Dispatcher;
use roadwatch::message::{Event, FrameMessage};
use roadwatch::orchestrator::FrameOrchestrator;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roadwatch", about = "Vehicle speed and plate enrichment for tracked frames")]
struct Cli {
    /// YAML configuration; built-in defaults when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// JSON-lines frame messages; stdin when omitted
    #[arg(long, short)]
    input: Option<PathBuf>,
    /// JSON-lines events; stdout when omitted
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Also emit annotated frames
    #[arg(long)]
    annotate: bool,
    /// Messages buffered per stream worker
    #[arg(long, default_value_t = 8)]
    queue: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roadwatch=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    // No text recognizer ships with the binary: plates stay unresolved.
    let orchestrator = FrameOrchestrator::from_config(&config, None, None, Arc::new(SystemClock::new()))
        .context("failed to set up frame processing")?;

    let (mut dispatcher, events) = Dispatcher::new(Arc::new(orchestrator), cli.annotate, cli.queue);

    let output = open_output(cli.output.as_deref())?;
    let writer = thread::Builder::new()
        .name("event-writer".into())
        .spawn(move || write_events(events, output))
        .context("failed to start event writer")?;

    let input = open_input(cli.input.as_deref())?;
    let mut messages = 0usize;

    for (lineno, line) in input.lines().enumerate() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }

        let message: FrameMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                warn!(line = lineno + 1, error = %err, "skipping malformed message");
                continue;
            }
        };

        messages += 1;
        if let Err(err) = dispatcher.dispatch(message) {
            warn!(line = lineno + 1, error = %err, "failed to dispatch message");
        }
    }

    let streams = dispatcher.streams();
    dispatcher.finish();

    let written = writer
        .join()
        .map_err(|_| anyhow!("event writer panicked"))??;

    info!(messages, streams, events = written, "done");

    Ok(())
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    })
}

fn write_events(events: Receiver<Event>, output: Box<dyn Write + Send>) -> Result<usize> {
    let mut out = BufWriter::new(output);
    let mut written = 0;

    for event in events {
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
        written += 1;
    }
    out.flush()?;

    Ok(written)
}
