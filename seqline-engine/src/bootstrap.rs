//! Transfer detection for newly tracked conversations.
//!
//! A conversation can be first observed partway through, after a call was
//! transferred into it. When the first event seen is a join carrying a media
//! channel, or a media update with audio, the events just before it are
//! scanned for a transfer by the same member; if one exists the conversation
//! is replayed from that transfer instead of from the first-seen event.

use metrics::counter;
use shared::models::{EventKind, RawEvent};
use tracing::{debug, info, warn};

use crate::{buffer::SequenceBuffer, history::HistoryFetcher};

/// Whether `event`, as the first event of a conversation, warrants a lookback.
#[must_use]
pub fn is_bootstrap_trigger(event: &RawEvent) -> bool {
    match event.kind {
        EventKind::MemberMedia => event.has_audio(),
        EventKind::MemberJoined => event.channel_id().is_some(),
        _ => false,
    }
}

/// A transfer found ahead of a trigger, with every fetched event from it onward.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStart {
    /// Id of the transfer event.
    pub transfer_id: i64,
    /// Events from the transfer up to the trigger, ascending.
    pub events: Vec<RawEvent>,
}

/// Looks back up to `lookback` events before `trigger` for an `rtc:transfer`
/// originated by the trigger's sender.
pub async fn find_preceding_transfer(
    fetcher: &dyn HistoryFetcher,
    trigger: &RawEvent,
    lookback: u32,
) -> Option<TransferStart> {
    let (cid, trigger_id) = trigger.sequence_key()?;
    let originator = trigger.from.as_deref()?;

    let start = trigger_id.saturating_sub(i64::from(lookback)).max(1);
    let count = usize::try_from(trigger_id.saturating_sub(start))
        .ok()
        .filter(|count| *count > 0)?;

    let mut events = match fetcher.fetch(cid, start, count).await {
        Ok(events) => events,
        Err(err) => {
            warn!(cid, trigger_id, error = %err, "bootstrap lookback failed");
            counter!("seqline_fetch_failures_total").increment(1);
            return None;
        }
    };

    events.retain(|event| {
        matches!(event.sequence_key(), Some((event_cid, id)) if event_cid == cid && (start..trigger_id).contains(&id))
    });
    events.sort_by_key(RawEvent::sequence_id);

    let position = events.iter().position(|event| {
        event.kind == EventKind::RtcTransfer && event.from.as_deref() == Some(originator)
    })?;
    let transfer_id = events[position].sequence_id()?;
    events.drain(..position);

    Some(TransferStart {
        transfer_id,
        events,
    })
}

/// Rewinds a freshly created buffer to a preceding transfer, if any, and
/// queues the events from the transfer up to the trigger.
pub(crate) async fn rewind_to_transfer(buffer: &mut SequenceBuffer, trigger: &RawEvent) {
    let lookback = buffer.settings().bootstrap_lookback;
    let fetcher = buffer.fetcher().clone();

    let Some(start) = find_preceding_transfer(fetcher.as_ref(), trigger, lookback).await else {
        debug!(cid = ?trigger.cid, id = ?trigger.id, "no preceding transfer");
        return;
    };

    info!(
        cid = %buffer.state().cid(),
        transfer_id = start.transfer_id,
        trigger_id = ?trigger.id,
        replayed = start.events.len(),
        "conversation starts at an earlier transfer"
    );
    buffer
        .state_mut()
        .rewind(start.transfer_id.saturating_sub(1));
    for event in start.events {
        buffer.enqueue(event);
    }
}
