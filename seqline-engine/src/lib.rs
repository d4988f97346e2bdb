//! # seqline engine
//!
//! Delivers events of many interleaved conversations to a [`Dispatcher`] in
//! strictly increasing id order per conversation, recovering gaps from a
//! [`HistoryFetcher`] and skipping ids that cannot be recovered.
//!
//! ```no_run
//! use std::sync::Arc;
//! use engine::{HandlerTable, Router, UnavailableHistory};
//! use shared::config::SequencingConfig;
//!
//! # async fn run(events: Vec<shared::models::RawEvent>) {
//! let mut router = Router::new(
//!     Arc::new(UnavailableHistory),
//!     Arc::new(HandlerTable::new()),
//!     SequencingConfig::default(),
//! );
//! for event in events {
//!     router.route(event).await;
//! }
//! let _snapshots = router.shutdown().await;
//! # }
//! ```

pub mod bootstrap;
pub mod buffer;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod http_history;
pub mod router;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use buffer::{DrainOutcome, DrainPhase, SequenceBuffer, SequenceSnapshot, SequenceState};
pub use dispatch::{Dispatcher, EventHandler, HandlerTable};
pub use error::{DispatchError, FetchError};
pub use history::{HistoryFetcher, InMemoryHistory, UnavailableHistory};
pub use http_history::HttpHistoryFetcher;
pub use router::Router;
