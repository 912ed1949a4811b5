//! Client module — runtime capability trait with live and fake backends.

pub mod docker;
pub mod fake;
pub mod live;

pub use docker::{BoxFuture, EventStream, RuntimeOps};
pub use fake::{FakeContainer, FakeDocker};
