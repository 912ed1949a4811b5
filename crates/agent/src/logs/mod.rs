//! Logs module — log records, subscriber fan-out, and the per-container pump.

pub mod fanout;
pub mod pump;
pub mod record;

pub use fanout::{Fanout, OverflowPolicy, SubscriberId};
pub use pump::{ListenerId, LogPump};
pub use record::LogRecord;
