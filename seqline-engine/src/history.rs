//! History fetch contract and the in-process archive implementation.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use anyhow::Context;
use async_trait::async_trait;
use shared::models::RawEvent;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::FetchError;

/// Source of past events for a conversation.
///
/// Implementations return the events whose ids fall in
/// `start_id..start_id + count`, best effort and ascending by id. Missing ids
/// are simply absent from the result.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetches up to `count` events starting at `start_id`.
    ///
    /// # Errors
    /// Returns a [`FetchError`] when the history source cannot be reached or
    /// its answer cannot be understood.
    async fn fetch(
        &self,
        cid: &str,
        start_id: i64,
        count: usize,
    ) -> Result<Vec<RawEvent>, FetchError>;
}

/// Fetcher used when no history source is configured; every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHistory;

#[async_trait]
impl HistoryFetcher for UnavailableHistory {
    async fn fetch(
        &self,
        cid: &str,
        _start_id: i64,
        _count: usize,
    ) -> Result<Vec<RawEvent>, FetchError> {
        Err(FetchError::Unavailable(cid.to_string()))
    }
}

/// Archive of events held in memory, keyed by conversation and id.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    conversations: RwLock<HashMap<String, BTreeMap<i64, RawEvent>>>,
}

impl InMemoryHistory {
    /// Empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an archive from sequenced events; unsequenced ones are ignored.
    pub fn from_events(events: impl IntoIterator<Item = RawEvent>) -> Self {
        let mut conversations: HashMap<String, BTreeMap<i64, RawEvent>> = HashMap::new();
        for event in events {
            if let Some((cid, id)) = event.sequence_key() {
                conversations
                    .entry(cid.to_string())
                    .or_default()
                    .insert(id, event);
            }
        }
        Self {
            conversations: RwLock::new(conversations),
        }
    }

    /// Loads an archive from a JSON-lines file, one event per line.
    ///
    /// # Errors
    /// Fails if the file cannot be read or a line is not a valid event.
    pub async fn load_jsonl(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read history archive {}", path.display()))?;

        let mut events = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: RawEvent = serde_json::from_str(line).with_context(|| {
                format!("invalid event on line {} of {}", index + 1, path.display())
            })?;
            events.push(event);
        }

        debug!(path = %path.display(), events = events.len(), "loaded history archive");
        Ok(Self::from_events(events))
    }

    /// Adds or replaces an event in the archive.
    #[cfg(test)]
    pub async fn record(&self, event: RawEvent) {
        let Some((cid, id)) = event.sequence_key() else {
            return;
        };
        let cid = cid.to_string();
        let mut guard = self.conversations.write().await;
        guard.entry(cid).or_default().insert(id, event);
    }

    #[cfg(test)]
    pub async fn event_count(&self, cid: &str) -> usize {
        let guard = self.conversations.read().await;
        guard.get(cid).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl HistoryFetcher for InMemoryHistory {
    async fn fetch(
        &self,
        cid: &str,
        start_id: i64,
        count: usize,
    ) -> Result<Vec<RawEvent>, FetchError> {
        let guard = self.conversations.read().await;
        let Some(events) = guard.get(cid) else {
            return Ok(Vec::new());
        };

        let span = i64::try_from(count).unwrap_or(i64::MAX);
        let end = start_id.saturating_add(span);
        let found: Vec<RawEvent> = events
            .range(start_id..end)
            .map(|(_, event)| event.clone())
            .collect();

        trace!(cid, start_id, count, found = found.len(), "served history from archive");
        Ok(found)
    }
}
