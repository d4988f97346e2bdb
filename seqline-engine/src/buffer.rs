//! Per-conversation sequencing buffer.
//!
//! A [`SequenceBuffer`] holds out-of-order arrivals for one conversation and
//! hands them to the [`Dispatcher`] in strictly increasing id order. When the
//! next id is missing but a higher one is known, it asks the
//! [`HistoryFetcher`] for the gap; ids the history cannot produce are skipped
//! so the conversation never stalls on an event that will not arrive.

use std::{collections::BTreeMap, ops::Range, sync::Arc, time::Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use shared::{config::SequencingConfig, models::RawEvent};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{dispatch::Dispatcher, history::HistoryFetcher};

/// Drain state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPhase {
    /// No drain in progress.
    Idle,
    /// Dispatching pending events in order.
    Draining,
    /// Waiting on a history fetch for a gap.
    Recovering,
}

/// How a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Everything known has been consumed, or the next id is not yet known to exist.
    CaughtUp,
    /// The dispatcher refused `id`; it stays pending for the next pass.
    Halted {
        /// Id of the refused event.
        id: i64,
    },
}

/// Ordering state for one conversation.
#[derive(Debug, Clone)]
pub struct SequenceState {
    cid: String,
    last_processed: i64,
    high_water_mark: i64,
    pending: BTreeMap<i64, RawEvent>,
    phase: DrainPhase,
}

impl SequenceState {
    /// State for a conversation first observed at `first_id`.
    pub fn seeded(cid: impl Into<String>, first_id: i64) -> Self {
        Self::with_last_processed(cid, first_id.saturating_sub(1))
    }

    /// State that resumes after `last_processed`.
    pub fn with_last_processed(cid: impl Into<String>, last_processed: i64) -> Self {
        Self {
            cid: cid.into(),
            last_processed,
            high_water_mark: last_processed,
            pending: BTreeMap::new(),
            phase: DrainPhase::Idle,
        }
    }

    /// Conversation this state orders.
    #[must_use]
    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// Highest id that has been dispatched or skipped.
    #[must_use]
    pub const fn last_processed(&self) -> i64 {
        self.last_processed
    }

    /// Highest id seen, processed or not.
    #[must_use]
    pub const fn high_water_mark(&self) -> i64 {
        self.high_water_mark
    }

    /// Current drain phase.
    #[must_use]
    pub const fn phase(&self) -> DrainPhase {
        self.phase
    }

    /// Buffered ids, ascending.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<i64> {
        self.pending.keys().copied().collect()
    }

    /// Records `event` under `id`. Returns `false` when the id was already
    /// consumed and the event was dropped.
    pub fn insert(&mut self, id: i64, event: RawEvent) -> bool {
        self.high_water_mark = self.high_water_mark.max(id);
        if id <= self.last_processed {
            return false;
        }
        self.pending.insert(id, event);
        true
    }

    /// Like [`insert`](Self::insert) but never replaces a pending entry.
    fn merge(&mut self, id: i64, event: RawEvent) -> bool {
        self.high_water_mark = self.high_water_mark.max(id);
        if id <= self.last_processed || self.pending.contains_key(&id) {
            return false;
        }
        self.pending.insert(id, event);
        true
    }

    /// Moves the consumption point back so that `last_processed + 1` is
    /// dispatched next.
    pub fn rewind(&mut self, last_processed: i64) {
        self.last_processed = last_processed;
        self.high_water_mark = self.high_water_mark.max(last_processed);
    }

    fn discard_stale(&mut self) {
        let last = self.last_processed;
        self.pending.retain(|id, _| *id > last);
    }
}

/// Point-in-time view of a conversation's ordering state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceSnapshot {
    /// Conversation id.
    pub cid: String,
    /// See [`SequenceState::last_processed`].
    pub last_processed: i64,
    /// See [`SequenceState::high_water_mark`].
    pub high_water_mark: i64,
    /// Number of buffered events.
    pub pending: usize,
    /// Events handed to the dispatcher.
    pub dispatched: u64,
    /// Ids given up on.
    pub skipped: u64,
}

/// Drives a [`SequenceState`] against its fetcher and dispatcher.
pub struct SequenceBuffer {
    state: SequenceState,
    fetcher: Arc<dyn HistoryFetcher>,
    dispatcher: Arc<dyn Dispatcher>,
    settings: SequencingConfig,
    inbox: Option<mpsc::UnboundedReceiver<RawEvent>>,
    /// Ids the last history fetch was asked for.
    covered: Range<i64>,
    dispatched: u64,
    skipped: u64,
}

impl std::fmt::Debug for SequenceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceBuffer")
            .field("state", &self.state)
            .field("dispatched", &self.dispatched)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

impl SequenceBuffer {
    /// Creates a buffer without an inbox.
    pub fn new(
        state: SequenceState,
        fetcher: Arc<dyn HistoryFetcher>,
        dispatcher: Arc<dyn Dispatcher>,
        settings: SequencingConfig,
    ) -> Self {
        Self {
            state,
            fetcher,
            dispatcher,
            settings,
            inbox: None,
            covered: 0..0,
            dispatched: 0,
            skipped: 0,
        }
    }

    /// Attaches the queue that arrivals for this conversation are pushed to.
    /// Arrivals are pulled in between suspension points of a drain.
    #[must_use]
    pub fn with_inbox(mut self, inbox: mpsc::UnboundedReceiver<RawEvent>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Current ordering state.
    #[must_use]
    pub const fn state(&self) -> &SequenceState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut SequenceState {
        &mut self.state
    }

    pub(crate) fn fetcher(&self) -> &Arc<dyn HistoryFetcher> {
        &self.fetcher
    }

    pub(crate) const fn settings(&self) -> &SequencingConfig {
        &self.settings
    }

    /// Counters and positions for reporting.
    #[must_use]
    pub fn snapshot(&self) -> SequenceSnapshot {
        SequenceSnapshot {
            cid: self.state.cid.clone(),
            last_processed: self.state.last_processed,
            high_water_mark: self.state.high_water_mark,
            pending: self.state.pending.len(),
            dispatched: self.dispatched,
            skipped: self.skipped,
        }
    }

    /// Buffers an event for this conversation.
    ///
    /// Returns `false` if the event carries no sequence id, belongs to another
    /// conversation, or has already been consumed.
    pub fn enqueue(&mut self, event: RawEvent) -> bool {
        let Some((cid, id)) = event.sequence_key() else {
            return false;
        };
        if cid != self.state.cid {
            warn!(expected = %self.state.cid, got = cid, id, "event routed to the wrong conversation");
            return false;
        }

        let buffered = self.state.insert(id, event);
        if buffered {
            trace!(cid = %self.state.cid, id, "buffered event");
        } else {
            trace!(cid = %self.state.cid, id, last_processed = self.state.last_processed, "dropped stale event");
        }
        buffered
    }

    /// Waits for the next arrival on the inbox. `None` once the inbox is closed
    /// or when the buffer has none.
    pub async fn next_arrival(&mut self) -> Option<RawEvent> {
        self.inbox.as_mut()?.recv().await
    }

    fn absorb_inbox(&mut self) {
        while let Some(event) = self.inbox.as_mut().and_then(|inbox| inbox.try_recv().ok()) {
            self.enqueue(event);
        }
    }

    /// Consumes pending events in id order until caught up or blocked.
    pub async fn drain(&mut self) -> DrainOutcome {
        self.state.phase = DrainPhase::Draining;
        debug!(cid = %self.state.cid, last_processed = self.state.last_processed, "drain started");

        let outcome = loop {
            self.absorb_inbox();
            let next_id = self.state.last_processed.saturating_add(1);

            if let Some(event) = self.state.pending.remove(&next_id) {
                if let Err(err) = self.dispatcher.dispatch(&event).await {
                    warn!(cid = %self.state.cid, id = next_id, error = %err, "dispatch failed; holding event");
                    counter!("seqline_dispatch_failures_total").increment(1);
                    self.state.pending.entry(next_id).or_insert(event);
                    break DrainOutcome::Halted { id: next_id };
                }
                self.state.last_processed = next_id;
                self.dispatched += 1;
                counter!("seqline_events_dispatched_total").increment(1);
                continue;
            }

            if self.state.high_water_mark <= next_id {
                self.state.discard_stale();
                break DrainOutcome::CaughtUp;
            }

            // A missing id inside the last fetched window is not in history either.
            if !self.covered.contains(&next_id) {
                self.recover(next_id).await;
            }
            if !self.state.pending.contains_key(&next_id) {
                self.skip(next_id);
            }
        };

        self.state.phase = DrainPhase::Idle;
        debug!(
            cid = %self.state.cid,
            last_processed = self.state.last_processed,
            high_water_mark = self.state.high_water_mark,
            pending = self.state.pending.len(),
            "drain finished"
        );
        outcome
    }

    /// Size of the history request for a gap starting at `next_id`: the
    /// configured window, stretched to reach the high-water mark, capped.
    fn recovery_window(&self, next_id: i64) -> usize {
        let span = self
            .state
            .high_water_mark
            .saturating_sub(next_id)
            .saturating_add(1);
        let span = usize::try_from(span).unwrap_or(usize::MAX);
        span.max(self.settings.fetch_window)
            .min(self.settings.max_fetch_window)
    }

    async fn recover(&mut self, next_id: i64) {
        self.state.phase = DrainPhase::Recovering;
        let count = self.recovery_window(next_id);
        debug!(cid = %self.state.cid, start_id = next_id, count, high_water_mark = self.state.high_water_mark, "recovering gap from history");

        counter!("seqline_history_fetches_total").increment(1);
        let span = i64::try_from(count).unwrap_or(i64::MAX);
        self.covered = next_id..next_id.saturating_add(span);
        let started = Instant::now();
        match self.fetcher.fetch(&self.state.cid, next_id, count).await {
            Ok(events) => {
                histogram!("seqline_fetch_latency_ms")
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                let received = events.len();
                let mut merged = 0_usize;
                for event in events {
                    let key = event
                        .sequence_key()
                        .map(|(cid, id)| (cid == self.state.cid, id));
                    match key {
                        Some((true, id)) if id >= next_id => {
                            if self.state.merge(id, event) {
                                merged += 1;
                            }
                        }
                        _ => {}
                    }
                }
                trace!(cid = %self.state.cid, received, merged, "merged fetched history");
            }
            Err(err) => {
                warn!(cid = %self.state.cid, start_id = next_id, error = %err, "history fetch failed");
                counter!("seqline_fetch_failures_total").increment(1);
            }
        }

        self.absorb_inbox();
        self.state.phase = DrainPhase::Draining;
    }

    fn skip(&mut self, id: i64) {
        warn!(cid = %self.state.cid, id, "event unrecoverable; skipping forward");
        counter!("seqline_events_skipped_total").increment(1);
        self.state.last_processed = id;
        self.skipped += 1;
        self.dispatcher.on_skip(&self.state.cid, id);
    }
}
