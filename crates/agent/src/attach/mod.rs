//! Attach module — attachment registry, lifecycle events, and subscriptions.

pub mod event;
pub mod filter;
pub mod listen;
pub mod manager;

pub use event::{LifecycleEvent, LifecycleKind};
pub use filter::SubscriptionFilter;
pub use listen::ListenExit;
pub use manager::AttachManager;
