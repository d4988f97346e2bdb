//! Wire-level models for server-pushed conversation events.

pub mod event;
pub mod timestamp;

pub use event::{EventKind, RawEvent};
pub use timestamp::Timestamp;
