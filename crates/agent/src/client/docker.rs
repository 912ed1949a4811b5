//! Runtime trait — the four container-runtime capabilities the attach
//! machinery needs.
//!
//! `live.rs` provides the real Bollard-backed implementation.
//! `fake.rs` provides a test double.

use std::future::Future;
use std::pin::Pin;

use tokio_stream::Stream;

use crate::docker::client::DockerError;
use crate::docker::event::RuntimeEvent;
use crate::docker::inventory::ContainerRef;
use crate::docker::stream::AttachedStreams;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, DockerError>> + Send + 'a>>;

/// Async interface over a container runtime.
///
/// Object-safe thanks to `Pin<Box<…>>` returns.
/// Implementations must be `Send + Sync` so they can live inside an `Arc`
/// shared by the manager and every attach task.
pub trait RuntimeOps: Send + Sync {
    /// Containers running right now.
    fn list_running(&self) -> BoxFuture<'_, Result<Vec<ContainerRef>, DockerError>>;

    /// Resolve a (possibly short) id to its display name.
    fn inspect<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ContainerRef, DockerError>>;

    /// Open the live container event stream. An `Err` means the stream could
    /// not be set up at all.
    fn events(&self) -> BoxFuture<'_, Result<EventStream<'_>, DockerError>>;

    /// Attach to a container's output. `Ok` is the runtime's success
    /// acknowledgement, `Err` its failure.
    fn attach<'a>(
        &'a self,
        id: &'a str,
        want_stdout: bool,
        want_stderr: bool,
    ) -> BoxFuture<'a, Result<AttachedStreams, DockerError>>;
}
