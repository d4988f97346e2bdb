//! Demultiplexes the event stream into per-conversation workers.
//!
//! Each conversation gets a worker task that owns its [`SequenceBuffer`] and
//! is fed through an unbounded inbox, so a conversation waiting on history
//! never holds up the others.

use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use metrics::{counter, gauge};
use shared::{config::SequencingConfig, models::RawEvent};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    bootstrap::{is_bootstrap_trigger, rewind_to_transfer},
    buffer::{SequenceBuffer, SequenceSnapshot, SequenceState},
    dispatch::Dispatcher,
    history::HistoryFetcher,
};

struct Conversation {
    inbox: mpsc::UnboundedSender<RawEvent>,
    worker: JoinHandle<SequenceSnapshot>,
}

/// Entry point of the engine: takes raw events in arrival order.
pub struct Router {
    fetcher: Arc<dyn HistoryFetcher>,
    dispatcher: Arc<dyn Dispatcher>,
    settings: SequencingConfig,
    conversations: HashMap<String, Conversation>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("settings", &self.settings)
            .field("conversations", &self.conversations.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Creates a router with no tracked conversations.
    pub fn new(
        fetcher: Arc<dyn HistoryFetcher>,
        dispatcher: Arc<dyn Dispatcher>,
        settings: SequencingConfig,
    ) -> Self {
        Self {
            fetcher,
            dispatcher,
            settings,
            conversations: HashMap::new(),
        }
    }

    /// Routes one event.
    ///
    /// Events without a conversation id or a numeric sequence id are
    /// dispatched immediately. Everything else is handed to the worker of its
    /// conversation, which is created on first sight.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn route(&mut self, event: RawEvent) {
        let Some(cid) = event.sequence_key().map(|(cid, _)| cid.to_string()) else {
            self.bypass(event).await;
            return;
        };

        match self.conversations.get(&cid) {
            Some(conversation) => {
                if conversation.inbox.send(event).is_err() {
                    error!(cid, "conversation worker is gone; event dropped");
                }
            }
            None => self.track(cid, event),
        }
    }

    async fn bypass(&self, event: RawEvent) {
        debug!(kind = %event.kind, id = ?event.id, cid = ?event.cid, "dispatching unsequenced event");
        counter!("seqline_events_bypassed_total").increment(1);
        if let Err(err) = self.dispatcher.dispatch(&event).await {
            warn!(kind = %event.kind, error = %err, "dispatch of unsequenced event failed");
            counter!("seqline_dispatch_failures_total").increment(1);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn track(&mut self, cid: String, first: RawEvent) {
        let Some(first_id) = first.sequence_id() else {
            return;
        };
        let (sender, inbox) = mpsc::unbounded_channel();
        let buffer = SequenceBuffer::new(
            SequenceState::seeded(cid.clone(), first_id),
            self.fetcher.clone(),
            self.dispatcher.clone(),
            self.settings.clone(),
        )
        .with_inbox(inbox);

        let bootstrap = self.settings.bootstrap_enabled && is_bootstrap_trigger(&first);
        info!(cid, first_id, kind = %first.kind, bootstrap, "tracking new conversation");

        let span = info_span!("conversation", cid = %cid);
        let worker = tokio::spawn(run_conversation(buffer, first, bootstrap).instrument(span));
        self.conversations.insert(
            cid,
            Conversation {
                inbox: sender,
                worker,
            },
        );
        gauge!("seqline_conversations_tracked").set(self.conversations.len() as f64);
    }

    /// Number of conversations with a live worker.
    #[must_use]
    pub fn tracked_conversations(&self) -> usize {
        self.conversations.len()
    }

    /// Whether `cid` has a live worker.
    #[must_use]
    pub fn is_tracking(&self, cid: &str) -> bool {
        self.conversations.contains_key(cid)
    }

    /// Closes every inbox, lets each worker finish its current drain and
    /// returns the final state of every conversation, ordered by cid.
    pub async fn shutdown(self) -> Vec<SequenceSnapshot> {
        let (cids, workers): (Vec<String>, Vec<JoinHandle<SequenceSnapshot>>) = self
            .conversations
            .into_iter()
            .map(|(cid, conversation)| {
                drop(conversation.inbox);
                (cid, conversation.worker)
            })
            .unzip();

        let mut snapshots = Vec::with_capacity(workers.len());
        for (cid, result) in cids.into_iter().zip(join_all(workers).await) {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => error!(cid, error = %err, "conversation worker failed"),
            }
        }
        snapshots.sort_by(|a, b| a.cid.cmp(&b.cid));

        gauge!("seqline_conversations_tracked").set(0.0);
        info!(conversations = snapshots.len(), "router shut down");
        snapshots
    }
}

async fn run_conversation(
    mut buffer: SequenceBuffer,
    first: RawEvent,
    bootstrap: bool,
) -> SequenceSnapshot {
    if bootstrap {
        rewind_to_transfer(&mut buffer, &first).await;
    }
    buffer.enqueue(first);
    buffer.drain().await;

    while let Some(event) = buffer.next_arrival().await {
        buffer.enqueue(event);
        buffer.drain().await;
    }

    debug!(cid = %buffer.state().cid(), "inbox closed");
    buffer.snapshot()
}
