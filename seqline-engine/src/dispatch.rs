//! Consumer-side contract and a kind-keyed dispatch table.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use shared::models::{EventKind, RawEvent};
use tracing::{debug, trace};

use crate::error::DispatchError;

/// Business handler invoked once an event's turn has come.
///
/// The engine calls `dispatch` at most once per successfully consumed id and
/// never concurrently for the same conversation.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    /// An error leaves the event pending; the conversation stops advancing
    /// until the next arrival re-triggers a drain.
    async fn dispatch(&self, event: &RawEvent) -> Result<(), DispatchError>;

    /// Called when `id` is given up as permanently missing and skipped
    /// without ever being dispatched.
    fn on_skip(&self, _cid: &str, _id: i64) {}
}

/// Handler for a single [`EventKind`] registered in a [`HandlerTable`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// # Errors
    /// Propagated to the engine as a dispatch failure.
    async fn handle(&self, event: &RawEvent) -> Result<(), DispatchError>;
}

/// Routes events to handlers by [`EventKind`].
///
/// Kinds without a handler go to the fallback when one is installed and are
/// otherwise acknowledged without action.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    fallback: Option<Arc<dyn EventHandler>>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(EventKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerTable")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl HandlerTable {
    /// Empty table without a fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    #[must_use]
    pub fn on(mut self, kind: EventKind, handler: impl EventHandler + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Installs the handler for kinds with no registered handler.
    #[must_use]
    pub fn fallback(mut self, handler: impl EventHandler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    /// Whether an event of `kind` reaches a handler, dedicated or fallback.
    #[must_use]
    pub fn handles(&self, kind: &EventKind) -> bool {
        self.handlers.contains_key(kind) || self.fallback.is_some()
    }
}

#[async_trait]
impl Dispatcher for HandlerTable {
    async fn dispatch(&self, event: &RawEvent) -> Result<(), DispatchError> {
        let handler = self
            .handlers
            .get(&event.kind)
            .or(self.fallback.as_ref());

        match handler {
            Some(handler) => {
                trace!(kind = %event.kind, id = ?event.id, "dispatching event");
                handler.handle(event).await
            }
            None => {
                debug!(kind = %event.kind, id = ?event.id, "no handler registered; event ignored");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        label: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &RawEvent) -> Result<(), DispatchError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, event.kind));
            Ok(())
        }
    }

    struct Refuse;

    #[async_trait]
    impl EventHandler for Refuse {
        async fn handle(&self, _event: &RawEvent) -> Result<(), DispatchError> {
            Err(DispatchError::rejected("not today"))
        }
    }

    #[tokio::test]
    async fn routes_by_kind_and_falls_back() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let table = HandlerTable::new()
            .on(
                EventKind::Text,
                Recorder {
                    label: "text",
                    seen: seen.clone(),
                },
            )
            .fallback(Recorder {
                label: "fallback",
                seen: seen.clone(),
            });

        table
            .dispatch(&RawEvent::sequenced("CON-1", 1, EventKind::Text))
            .await
            .unwrap();
        table
            .dispatch(&RawEvent::sequenced("CON-1", 2, EventKind::MemberLeft))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["text:text".to_string(), "fallback:member:left".to_string()]
        );
    }

    #[tokio::test]
    async fn unhandled_kind_without_fallback_is_acknowledged() {
        let table = HandlerTable::new().on(EventKind::Text, Recorder::default());

        assert!(!table.handles(&EventKind::Image));
        table
            .dispatch(&RawEvent::sequenced("CON-1", 1, EventKind::Image))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let table = HandlerTable::new().on(EventKind::Custom, Refuse);

        let err = table
            .dispatch(&RawEvent::sequenced("CON-1", 1, EventKind::Custom))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
    }

    #[test]
    fn debug_lists_registered_kinds() {
        let table = HandlerTable::new()
            .on(EventKind::Text, Recorder::default())
            .on(EventKind::RtcTransfer, Recorder::default());

        let rendered = format!("{table:?}");
        assert!(rendered.contains("rtc:transfer"));
        assert!(rendered.contains("fallback: false"));
    }
}
