//! Offline replay of a recorded event stream.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use async_trait::async_trait;
use engine::{
    DispatchError, Dispatcher, HistoryFetcher, HttpHistoryFetcher, InMemoryHistory, Router,
    SequenceSnapshot, UnavailableHistory, telemetry,
};
use shared::{config::Config, models::RawEvent};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Arguments of the `replay` subcommand.
#[derive(Debug)]
pub struct ReplayOptions {
    pub events: PathBuf,
    pub history: Option<PathBuf>,
    pub history_url: Option<String>,
    pub config: Option<PathBuf>,
    pub summary: bool,
    pub metrics: bool,
}

/// Writes each dispatched event as one JSON line.
pub struct JsonLinesDispatcher {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesDispatcher {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

#[async_trait]
impl Dispatcher for JsonLinesDispatcher {
    async fn dispatch(&self, event: &RawEvent) -> Result<(), DispatchError> {
        let line = serde_json::to_string(event).map_err(anyhow::Error::from)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| DispatchError::rejected("output writer poisoned"))?;
        writeln!(out, "{line}").map_err(anyhow::Error::from)?;
        out.flush().map_err(anyhow::Error::from)?;
        Ok(())
    }

    fn on_skip(&self, cid: &str, id: i64) {
        warn!(cid, id, "event never dispatched");
    }
}

/// Routes every event of `options.events` through a [`Router`] in file order.
///
/// # Errors
/// Returns an error if the configuration, the event stream or the history
/// archive cannot be loaded.
pub async fn run_replay(options: ReplayOptions) -> anyhow::Result<()> {
    let mut config = Config::load_config(options.config.clone())?;
    if let Some(url) = &options.history_url {
        config.history.base_url = Some(url.clone());
    }
    telemetry::initialize_tracing(&config);
    let metrics = if options.metrics {
        telemetry::metrics_handle()
    } else {
        None
    };

    let fetcher = history_source(&options, &config).await?;
    let input = read_events(&options.events).await?;

    let mut router = Router::new(
        fetcher,
        Arc::new(JsonLinesDispatcher::stdout()),
        config.sequencing.clone(),
    );
    let routed = route_lines(&mut router, &input).await?;
    let snapshots = router.shutdown().await;
    info!(routed, conversations = snapshots.len(), "replay finished");

    if options.summary {
        eprint!("{}", render_summary(&snapshots));
    }
    if let Some(handle) = metrics {
        eprint!("{}", handle.render());
    }
    Ok(())
}

async fn history_source(
    options: &ReplayOptions,
    config: &Config,
) -> anyhow::Result<Arc<dyn HistoryFetcher>> {
    if let Some(path) = &options.history {
        return Ok(Arc::new(InMemoryHistory::load_jsonl(path).await?));
    }
    if config.history.base_url.is_some() {
        let fetcher = HttpHistoryFetcher::from_config(&config.history)
            .context("failed to set up the history endpoint")?;
        return Ok(Arc::new(fetcher));
    }
    Ok(Arc::new(UnavailableHistory))
}

async fn read_events(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("failed to read events from stdin")?;
        return Ok(input);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read events file {}", path.display()))
}

async fn route_lines(router: &mut Router, input: &str) -> anyhow::Result<usize> {
    let mut routed = 0;
    for (index, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: RawEvent = serde_json::from_str(line)
            .with_context(|| format!("invalid event on line {}", index + 1))?;
        router.route(event).await;
        routed += 1;
    }
    Ok(routed)
}

fn render_summary(snapshots: &[SequenceSnapshot]) -> String {
    snapshots
        .iter()
        .map(|s| {
            format!(
                "{} last_processed={} high_water_mark={} dispatched={} skipped={} pending={}\n",
                s.cid, s.last_processed, s.high_water_mark, s.dispatched, s.skipped, s.pending
            )
        })
        .collect()
}
