//! Fake — test double for the container runtime.
//!
//! Provides a deterministic [`FakeDocker`] that implements [`RuntimeOps`]
//! using in-memory state. Attached output is backed by in-memory pipes that
//! tests write to directly, and events are pushed by the test, so unit and
//! integration tests run without a Docker daemon.

use std::collections::HashMap;

use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::docker::{BoxFuture, EventStream, RuntimeOps};
use crate::docker::client::DockerError;
use crate::docker::event::RuntimeEvent;
use crate::docker::inventory::ContainerRef;
use crate::docker::stream::{AttachedStreams, StreamKind};

const PIPE_CAPACITY: usize = 64 * 1024;

// ── In-memory state ─────────────────────────────────────────────

/// A canned container for the fake store.
#[derive(Clone, Debug)]
pub struct FakeContainer {
    /// Canonical id; may be longer than the short form.
    pub id: String,
    /// Name exactly as the runtime reports it, leading `/` included.
    pub raw_name: String,
    pub running: bool,
    /// Refuse the attach handshake for this container.
    pub fail_attach: bool,
}

impl FakeContainer {
    /// A running container called `name`.
    pub fn running(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            raw_name: format!("/{}", name),
            running: true,
            fail_attach: false,
        }
    }

    pub fn failing_attach(mut self) -> Self {
        self.fail_attach = true;
        self
    }
}

/// Writer halves of one live attachment.
struct FakeAttachment {
    stdout: DuplexStream,
    stderr: DuplexStream,
}

/// Mutable inner state protected by a mutex.
#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    attachments: HashMap<String, FakeAttachment>,
    event_subscribers: Vec<mpsc::UnboundedSender<Result<RuntimeEvent, DockerError>>>,
    fail_list: bool,
    fail_events: bool,
    attach_count: usize,
}

impl Inner {
    /// Runtime-style id lookup: an exact id or any unique prefix of one.
    fn resolve(&self, id: &str) -> Option<String> {
        if self.containers.contains_key(id) {
            return Some(id.to_string());
        }
        let mut matches = self.containers.keys().filter(|k| k.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        }
    }

    fn emit(&mut self, event: RuntimeEvent) {
        self.event_subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }
}

/// A fake container runtime for deterministic testing.
pub struct FakeDocker {
    inner: Mutex<Inner>,
}

impl FakeDocker {
    /// Create an empty fake runtime.
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// Seed a container into the fake store without emitting an event.
    pub async fn add_container(&self, container: FakeContainer) {
        let mut state = self.inner.lock().await;
        state.containers.insert(container.id.clone(), container);
    }

    /// Seed a container and announce it with a `start` event.
    pub async fn start_container(&self, container: FakeContainer) {
        let mut state = self.inner.lock().await;
        let id = container.id.clone();
        state.containers.insert(id.clone(), container);
        state.emit(RuntimeEvent::new("start", id));
    }

    /// Stop a container: its attachment (if any) sees end-of-stream on both
    /// pipes and a `die` event is emitted.
    pub async fn stop_container(&self, id: &str) -> Result<(), DockerError> {
        let mut state = self.inner.lock().await;
        let full = state
            .resolve(id)
            .ok_or_else(|| DockerError::ContainerNotFound(id.to_string()))?;
        if let Some(c) = state.containers.get_mut(&full) {
            c.running = false;
        }
        state.attachments.remove(&full);
        state.emit(RuntimeEvent::new("die", full));
        Ok(())
    }

    /// Push an arbitrary event to every open event stream.
    pub async fn emit(&self, event: RuntimeEvent) {
        self.inner.lock().await.emit(event);
    }

    /// Write raw bytes to the stdout of a container's live attachment.
    pub async fn write_stdout(&self, id: &str, data: &[u8]) -> Result<(), DockerError> {
        self.write(id, StreamKind::Stdout, data).await
    }

    /// Write raw bytes to the stderr of a container's live attachment.
    pub async fn write_stderr(&self, id: &str, data: &[u8]) -> Result<(), DockerError> {
        self.write(id, StreamKind::Stderr, data).await
    }

    async fn write(&self, id: &str, kind: StreamKind, data: &[u8]) -> Result<(), DockerError> {
        let mut state = self.inner.lock().await;
        let full = state
            .resolve(id)
            .ok_or_else(|| DockerError::ContainerNotFound(id.to_string()))?;
        let attachment = state.attachments.get_mut(&full).ok_or_else(|| {
            DockerError::AttachFailed { id: id.to_string(), reason: "not attached".to_string() }
        })?;
        let pipe = match kind {
            StreamKind::Stdout => &mut attachment.stdout,
            StreamKind::Stderr => &mut attachment.stderr,
        };
        pipe.write_all(data).await.map_err(|e| DockerError::AttachFailed {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// End every open event stream.
    pub async fn close_events(&self) {
        self.inner.lock().await.event_subscribers.clear();
    }

    /// Make `list_running` fail.
    pub async fn fail_listing(&self, fail: bool) {
        self.inner.lock().await.fail_list = fail;
    }

    /// Make `events` fail at setup.
    pub async fn fail_events(&self, fail: bool) {
        self.inner.lock().await.fail_events = fail;
    }

    /// Whether a container currently has a live attachment.
    pub async fn is_attached(&self, id: &str) -> bool {
        let state = self.inner.lock().await;
        state
            .resolve(id)
            .map(|full| state.attachments.contains_key(&full))
            .unwrap_or(false)
    }

    /// Number of event streams still open.
    pub async fn event_stream_count(&self) -> usize {
        let mut state = self.inner.lock().await;
        state.event_subscribers.retain(|tx| !tx.is_closed());
        state.event_subscribers.len()
    }

    /// Number of successful attach handshakes served so far.
    pub async fn attach_count(&self) -> usize {
        self.inner.lock().await.attach_count
    }
}

impl Default for FakeDocker {
    fn default() -> Self {
        Self::new()
    }
}

// ── RuntimeOps implementation ───────────────────────────────────

impl RuntimeOps for FakeDocker {
    fn list_running(&self) -> BoxFuture<'_, Result<Vec<ContainerRef>, DockerError>> {
        Box::pin(async {
            let state = self.inner.lock().await;
            if state.fail_list {
                return Err(DockerError::ConnectionFailed("fake listing failure".to_string()));
            }
            state
                .containers
                .values()
                .filter(|c| c.running)
                .map(|c| ContainerRef::from_runtime(&c.id, &c.raw_name))
                .collect()
        })
    }

    fn inspect<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ContainerRef, DockerError>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            let full = state
                .resolve(id)
                .ok_or_else(|| DockerError::ContainerNotFound(id.to_string()))?;
            let c = &state.containers[&full];
            ContainerRef::from_runtime(&c.id, &c.raw_name)
        })
    }

    fn events(&self) -> BoxFuture<'_, Result<EventStream<'_>, DockerError>> {
        Box::pin(async {
            let mut state = self.inner.lock().await;
            if state.fail_events {
                return Err(DockerError::ConnectionFailed("fake event failure".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.event_subscribers.push(tx);
            Ok(Box::pin(UnboundedReceiverStream::new(rx)) as EventStream<'_>)
        })
    }

    fn attach<'a>(
        &'a self,
        id: &'a str,
        _want_stdout: bool,
        _want_stderr: bool,
    ) -> BoxFuture<'a, Result<AttachedStreams, DockerError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            let full = state
                .resolve(id)
                .ok_or_else(|| DockerError::ContainerNotFound(id.to_string()))?;
            let c = &state.containers[&full];
            if c.fail_attach || !c.running {
                return Err(DockerError::AttachFailed {
                    id: id.to_string(),
                    reason: "refused by fake".to_string(),
                });
            }

            let (stdout_w, stdout_r) = tokio::io::duplex(PIPE_CAPACITY);
            let (stderr_w, stderr_r) = tokio::io::duplex(PIPE_CAPACITY);
            state.attachments.insert(full, FakeAttachment { stdout: stdout_w, stderr: stderr_w });
            state.attach_count += 1;
            Ok(AttachedStreams::new(stdout_r, stderr_r))
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────
