//! Fakes for the fetcher and dispatcher collaborators.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use shared::models::RawEvent;

use crate::{
    dispatch::Dispatcher,
    error::{DispatchError, FetchError},
    history::{HistoryFetcher, InMemoryHistory},
};

/// History backed by an archive that records every request it serves.
#[derive(Default)]
pub struct ScriptedHistory {
    archive: InMemoryHistory,
    requests: Mutex<Vec<(String, i64, usize)>>,
    failing: bool,
}

impl ScriptedHistory {
    pub fn with_events(events: impl IntoIterator<Item = RawEvent>) -> Arc<Self> {
        Arc::new(Self {
            archive: InMemoryHistory::from_events(events),
            ..Self::default()
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<(String, i64, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryFetcher for ScriptedHistory {
    async fn fetch(
        &self,
        cid: &str,
        start_id: i64,
        count: usize,
    ) -> Result<Vec<RawEvent>, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((cid.to_string(), start_id, count));
        if self.failing {
            return Err(FetchError::Transport("connection reset".into()));
        }
        self.archive.fetch(cid, start_id, count).await
    }
}

/// Dispatcher that records dispatched events and skipped ids.
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<RawEvent>>,
    skipped: Mutex<Vec<(String, i64)>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `times` dispatches of event `id` fail.
    pub fn fail_on(&self, id: &str, times: usize) {
        self.failures.lock().unwrap().insert(id.to_string(), times);
    }

    pub fn events(&self) -> Vec<RawEvent> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.events()
            .iter()
            .filter_map(RawEvent::sequence_id)
            .collect()
    }

    pub fn ids_for(&self, cid: &str) -> Vec<i64> {
        self.events()
            .iter()
            .filter(|event| event.cid.as_deref() == Some(cid))
            .filter_map(RawEvent::sequence_id)
            .collect()
    }

    pub fn skipped(&self) -> Vec<(String, i64)> {
        self.skipped.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: &RawEvent) -> Result<(), DispatchError> {
        if let Some(id) = event.id.as_deref() {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(id).filter(|remaining| **remaining > 0) {
                *remaining -= 1;
                return Err(DispatchError::rejected(format!("scripted failure for {id}")));
            }
        }
        self.dispatched.lock().unwrap().push(event.clone());
        tokio::task::yield_now().await;
        Ok(())
    }

    fn on_skip(&self, cid: &str, id: i64) {
        self.skipped.lock().unwrap().push((cid.to_string(), id));
    }
}
