//! Manager — registry of live attachments, container discovery, and the
//! lifecycle-event broadcast.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::event::LifecycleEvent;
use crate::client::docker::RuntimeOps;
use crate::docker::client::DockerError;
use crate::docker::inventory::{short_id, ContainerRef};
use crate::docker::stream::AttachedStreams;
use crate::logs::fanout::{self, Fanout, OverflowPolicy, Subscriber, SubscriberId};
use crate::logs::pump::LogPump;

/// Everything guarded by the manager's single lock.
struct Registry {
    attached: HashMap<String, Arc<LogPump>>,
    /// Ids with an attach handshake in progress.
    connecting: HashSet<String>,
    /// Ids that got a `start` while their previous pump was still draining.
    /// The pump re-attaches once it has emitted its `Detach`.
    restart_pending: HashSet<String>,
    subscribers: Fanout<LifecycleEvent>,
}

/// A registered pump and the streams it reads.
struct Attachment {
    container: ContainerRef,
    pump: Arc<LogPump>,
    streams: AttachedStreams,
}

/// Owns every attachment on one host.
///
/// Construct with [`AttachManager::new`], register any early subscribers,
/// then call [`AttachManager::start`] to run discovery. Every task the
/// manager spawns is tied to its shutdown token.
pub struct AttachManager {
    runtime: Arc<dyn RuntimeOps>,
    registry: Mutex<Registry>,
    policy: OverflowPolicy,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
}

impl AttachManager {
    pub fn new(runtime: Arc<dyn RuntimeOps>, policy: OverflowPolicy) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            registry: Mutex::new(Registry {
                attached: HashMap::new(),
                connecting: HashSet::new(),
                restart_pending: HashSet::new(),
                subscribers: Fanout::new(policy),
            }),
            policy,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    /// `new` followed by `start`.
    pub async fn connect(
        runtime: Arc<dyn RuntimeOps>,
        policy: OverflowPolicy,
    ) -> Result<Arc<Self>, DockerError> {
        let manager = Self::new(runtime, policy);
        manager.start().await?;
        Ok(manager)
    }

    /// Open the runtime event stream, then attach to every running
    /// container. `start` events arriving from then on trigger further
    /// attaches in the background.
    ///
    /// A failure to list containers or to open the event stream is returned
    /// and leaves the manager shut down. Only the first call does anything.
    pub async fn start(self: &Arc<Self>) -> Result<(), DockerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Attach manager already started");
            return Ok(());
        }
        let (ready_tx, ready_rx) = oneshot::channel();
        self.tasks.spawn(Arc::clone(self).watch_events(ready_tx));

        let opened = ready_rx.await.unwrap_or(Err(DockerError::EventStreamClosed));
        if let Err(e) = opened {
            error!(error = %e, "Could not subscribe to Docker events");
            self.shutdown().await;
            return Err(e);
        }

        let containers = match self.runtime.list_running().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "Could not list running containers");
                self.shutdown().await;
                return Err(e);
            }
        };

        info!("Discovered {} running containers", containers.len());
        for container in containers {
            self.attach(&container.id).await;
        }
        Ok(())
    }

    async fn watch_events(self: Arc<Self>, ready: oneshot::Sender<Result<(), DockerError>>) {
        let runtime = Arc::clone(&self.runtime);
        let mut events = match runtime.events().await {
            Ok(events) => {
                let _ = ready.send(Ok(()));
                events
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) if event.is_start() => {
                    let manager = Arc::clone(&self);
                    let id = short_id(&event.id).to_string();
                    self.tasks.spawn(async move { manager.attach(&id).await });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Docker event stream failed");
                    break;
                }
                None => {
                    error!("Docker event stream ended");
                    break;
                }
            }
        }

        // Without events the manager can no longer see new containers.
        self.shutdown.cancel();
    }

    /// Attach to one container. Failures are logged and end here; the next
    /// `start` event for the container is the only retry.
    pub(crate) async fn attach(self: &Arc<Self>, id: &str) {
        if let Some(live) = self.open(id).await {
            let manager = Arc::clone(self);
            self.tasks.spawn(async move { manager.run_pump(live).await });
        }
    }

    /// Handshake with the runtime, register the pump and announce it.
    async fn open(&self, id: &str) -> Option<Attachment> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        {
            let mut registry = self.registry.lock().await;
            if registry.attached.contains_key(id) {
                // Most likely a restart whose old stream has not drained yet.
                debug!(container_id = %id, "Previous attachment still live, attach deferred");
                registry.restart_pending.insert(id.to_string());
                return None;
            }
            if !registry.connecting.insert(id.to_string()) {
                debug!(container_id = %id, "Attach already in progress, skipping");
                return None;
            }
        }

        let connected = self.handshake(id).await;

        let mut registry = self.registry.lock().await;
        registry.connecting.remove(id);
        let (container, streams) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                warn!(container_id = %id, error = %e, "Attach failed");
                return None;
            }
        };
        let pump = Arc::new(LogPump::new(container.clone(), self.policy));
        registry.attached.insert(container.id.clone(), Arc::clone(&pump));
        let targets = registry.subscribers.snapshot();
        drop(registry);

        info!(container_id = %container.id, name = %container.name, "Attached");
        self.deliver(&targets, LifecycleEvent::attach(&container)).await;
        Some(Attachment { container, pump, streams })
    }

    async fn handshake(&self, id: &str) -> Result<(ContainerRef, AttachedStreams), DockerError> {
        let container = self.runtime.inspect(id).await?;
        let streams = self.runtime.attach(id, true, true).await?;
        Ok((container, streams))
    }

    /// Pump until the attachment ends and announce the detach. A `start`
    /// that arrived in the meantime is served here, in the same task, so
    /// the new attachment's events follow the old `Detach`.
    async fn run_pump(self: Arc<Self>, mut live: Attachment) {
        loop {
            let Attachment { container, pump, streams } = live;
            pump.run(streams, self.shutdown.child_token()).await;

            let restart = {
                let mut registry = self.registry.lock().await;
                registry.attached.remove(&container.id);
                registry.restart_pending.remove(&container.id)
            };

            info!(container_id = %container.id, name = %container.name, "Detached");
            self.broadcast(LifecycleEvent::detach(&container)).await;

            if !restart {
                return;
            }
            debug!(container_id = %container.id, "Re-attaching restarted container");
            match self.open(&container.id).await {
                Some(next) => live = next,
                None => return,
            }
        }
    }

    /// Send `event` to every lifecycle subscriber, one at a time, under
    /// each subscriber's overflow policy.
    pub async fn broadcast(&self, event: LifecycleEvent) {
        let targets = self.registry.lock().await.subscribers.snapshot();
        self.deliver(&targets, event).await;
    }

    // Delivery runs outside the registry lock so a subscriber may call
    // `lookup` while an event is in flight to it.
    async fn deliver(&self, targets: &[Subscriber<LifecycleEvent>], event: LifecycleEvent) {
        let gone = fanout::deliver(targets, &event, self.policy).await;
        if !gone.is_empty() {
            self.registry.lock().await.subscribers.remove_all(&gone);
        }
    }

    /// Register a lifecycle subscriber. An `Attach` for every container
    /// attached right now is replayed to it in the background; the replay
    /// is not ordered against live events.
    pub async fn subscribe_events(&self, tx: mpsc::Sender<LifecycleEvent>) -> SubscriberId {
        self.register_events(tx, None).await
    }

    /// Like [`subscribe_events`](Self::subscribe_events), but this
    /// subscriber is served under `policy` instead of the manager's.
    pub async fn subscribe_events_with(
        &self,
        tx: mpsc::Sender<LifecycleEvent>,
        policy: OverflowPolicy,
    ) -> SubscriberId {
        self.register_events(tx, Some(policy)).await
    }

    async fn register_events(
        &self,
        tx: mpsc::Sender<LifecycleEvent>,
        policy: Option<OverflowPolicy>,
    ) -> SubscriberId {
        let (id, replay) = {
            let mut registry = self.registry.lock().await;
            let id = match policy {
                Some(policy) => registry.subscribers.subscribe_with(tx.clone(), policy),
                None => registry.subscribers.subscribe(tx.clone()),
            };
            let replay: Vec<_> = registry
                .attached
                .values()
                .map(|pump| LifecycleEvent::attach(pump.container()))
                .collect();
            (id, replay)
        };

        if !replay.is_empty() {
            let shutdown = self.shutdown.clone();
            self.tasks.spawn(async move {
                for event in replay {
                    let sent = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        sent = tx.send(event) => sent,
                    };
                    if sent.is_err() {
                        return;
                    }
                }
            });
        }
        id
    }

    pub async fn unsubscribe_events(&self, id: SubscriberId) -> bool {
        self.registry.lock().await.subscribers.unsubscribe(id)
    }

    pub(crate) fn try_unsubscribe_events(&self, id: SubscriberId) -> Option<bool> {
        self.registry.try_lock().ok().map(|mut r| r.subscribers.unsubscribe(id))
    }

    /// The live pump for a short container id, if attached.
    pub async fn lookup(&self, id: &str) -> Option<Arc<LogPump>> {
        self.registry.lock().await.attached.get(id).cloned()
    }

    /// Containers attached right now.
    pub async fn attached(&self) -> Vec<ContainerRef> {
        self.registry
            .lock()
            .await
            .attached
            .values()
            .map(|pump| pump.container().clone())
            .collect()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.lock().await.subscribers.len()
    }

    /// Stop discovery, end every attachment (each emits its `Detach`), and
    /// wait for all manager tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Resolves once the manager is shutting down, whether requested or
    /// because the runtime event stream was lost.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::event::LifecycleKind;
    use crate::client::fake::{FakeContainer, FakeDocker};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    async fn next_event(rx: &mut mpsc::Receiver<LifecycleEvent>) -> LifecycleEvent {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for lifecycle event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_start_attaches_running_containers() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789ffff", "webapp")).await;

        let manager = AttachManager::new(fake.clone(), OverflowPolicy::Block);
        let (tx, mut rx) = mpsc::channel(16);
        manager.subscribe_events(tx).await;
        manager.start().await.unwrap();

        let ev = next_event(&mut rx).await;
        assert_eq!(ev.kind, LifecycleKind::Attach);
        assert_eq!(ev.id, "abc123456789");
        assert_eq!(ev.name, "webapp");
        assert!(manager.lookup("abc123456789").await.is_some());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let fake = Arc::new(FakeDocker::new());
        fake.fail_listing(true).await;

        let result = AttachManager::connect(fake, OverflowPolicy::Block).await;
        assert!(matches!(result, Err(DockerError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_event_setup_failure_is_returned() {
        let fake = Arc::new(FakeDocker::new());
        fake.fail_events(true).await;

        let manager = AttachManager::new(fake, OverflowPolicy::Block);
        assert!(manager.start().await.is_err());
        assert!(manager.is_closed());
    }

    #[tokio::test]
    async fn test_failed_attach_is_silent() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789", "webapp").failing_attach()).await;

        let manager = AttachManager::new(fake.clone(), OverflowPolicy::Block);
        let (tx, mut rx) = mpsc::channel(16);
        manager.subscribe_events(tx).await;
        manager.start().await.unwrap();

        assert!(manager.attached().await.is_empty());
        assert!(rx.try_recv().is_err());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_event_attaches_new_container() {
        let fake = Arc::new(FakeDocker::new());
        let manager = AttachManager::connect(fake.clone(), OverflowPolicy::Block).await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        manager.subscribe_events(tx).await;

        fake.start_container(FakeContainer::running("def456789012aaaa", "db")).await;

        let ev = next_event(&mut rx).await;
        assert_eq!(ev, LifecycleEvent::attach(&ContainerRef::new("def456789012", "db")));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_emits_detach_and_unregisters() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789", "webapp")).await;
        let manager = AttachManager::new(fake.clone(), OverflowPolicy::Block);
        let (tx, mut rx) = mpsc::channel(16);
        manager.subscribe_events(tx).await;
        manager.start().await.unwrap();
        assert!(next_event(&mut rx).await.is_attach());

        fake.stop_container("abc123456789").await.unwrap();

        let ev = next_event(&mut rx).await;
        assert!(ev.is_detach());
        assert_eq!(ev.id, "abc123456789");
        assert!(manager.lookup("abc123456789").await.is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_while_attached_does_not_reattach() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789", "webapp")).await;
        let manager = AttachManager::connect(fake.clone(), OverflowPolicy::Block).await.unwrap();

        manager.attach("abc123456789").await;
        fake.emit(crate::docker::event::RuntimeEvent::new("start", "abc123456789")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fake.attach_count().await, 1);
        assert_eq!(manager.attached().await.len(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_while_draining_reattaches() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789", "webapp")).await;
        let manager = AttachManager::new(fake.clone(), OverflowPolicy::Block);
        let (tx, mut rx) = mpsc::channel(16);
        manager.subscribe_events(tx).await;
        manager.start().await.unwrap();
        assert!(next_event(&mut rx).await.is_attach());

        // A one-slot listener keeps the pump blocked mid-stream.
        let (lines_tx, mut lines) = mpsc::channel(1);
        let pump = manager.lookup("abc123456789").await.unwrap();
        pump.add_listener(lines_tx).await;
        fake.write_stdout("abc123456789", b"one\ntwo\nthree\n").await.unwrap();

        fake.stop_container("abc123456789").await.unwrap();
        fake.start_container(FakeContainer::running("abc123456789", "webapp")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.attach_count().await, 1, "old stream has not drained yet");

        for expected in ["one", "two", "three"] {
            let line = tokio::time::timeout(WAIT, lines.recv()).await.unwrap().unwrap();
            assert_eq!(line.text, expected);
        }

        assert!(next_event(&mut rx).await.is_detach());
        let again = next_event(&mut rx).await;
        assert!(again.is_attach());
        assert_eq!(again.id, "abc123456789");
        assert_eq!(fake.attach_count().await, 2);
        assert!(fake.is_attached("abc123456789").await);

        let fresh = manager.lookup("abc123456789").await.unwrap();
        assert!(!Arc::ptr_eq(&pump, &fresh));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_runs_once() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789", "webapp")).await;
        let manager = AttachManager::new(fake.clone(), OverflowPolicy::Block);

        manager.start().await.unwrap();
        manager.start().await.unwrap();

        assert_eq!(fake.event_stream_count().await, 1);
        assert_eq!(fake.attach_count().await, 1);

        // A single watcher means a single attach per start event.
        fake.start_container(FakeContainer::running("def456789012", "db")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.attach_count().await, 2);
        assert_eq!(manager.attached().await.len(), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_honours_subscriber_policy() {
        let fake = Arc::new(FakeDocker::new());
        let manager = AttachManager::connect(fake, OverflowPolicy::DropNewest).await.unwrap();
        let (lossy_tx, mut lossy) = mpsc::channel(1);
        let (strict_tx, mut strict) = mpsc::channel(1);
        manager.subscribe_events(lossy_tx).await;
        manager.subscribe_events_with(strict_tx, OverflowPolicy::Block).await;

        let reader = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..3 {
                ids.push(next_event(&mut strict).await.id);
            }
            ids
        });
        for id in ["aaa000000001", "aaa000000002", "aaa000000003"] {
            manager.broadcast(LifecycleEvent::detach(&ContainerRef::new(id, "svc"))).await;
        }

        assert_eq!(reader.await.unwrap(), vec!["aaa000000001", "aaa000000002", "aaa000000003"]);
        assert_eq!(next_event(&mut lossy).await.id, "aaa000000001");
        assert!(lossy.try_recv().is_err());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_replay() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789", "webapp")).await;
        fake.add_container(FakeContainer::running("def456789012", "db")).await;
        let manager = AttachManager::connect(fake, OverflowPolicy::Block).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        manager.subscribe_events(tx).await;

        let mut names = vec![next_event(&mut rx).await.name, next_event(&mut rx).await.name];
        names.sort();
        assert_eq!(names, vec!["db", "webapp"]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_events() {
        let fake = Arc::new(FakeDocker::new());
        let manager = AttachManager::connect(fake.clone(), OverflowPolicy::Block).await.unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let id = manager.subscribe_events(tx).await;
        assert_eq!(manager.subscriber_count().await, 1);

        assert!(manager.unsubscribe_events(id).await);
        fake.start_container(FakeContainer::running("abc123456789", "webapp")).await;

        // Sender was dropped with the subscription.
        assert!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_lost_event_stream_closes_manager() {
        let fake = Arc::new(FakeDocker::new());
        let manager = AttachManager::connect(fake.clone(), OverflowPolicy::Block).await.unwrap();

        fake.close_events().await;
        tokio::time::timeout(WAIT, manager.closed()).await.expect("manager should close");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_detaches_everything() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::running("abc123456789", "webapp")).await;
        let manager = AttachManager::new(fake, OverflowPolicy::Block);
        let (tx, mut rx) = mpsc::channel(16);
        manager.subscribe_events(tx).await;
        manager.start().await.unwrap();
        assert!(next_event(&mut rx).await.is_attach());

        tokio::time::timeout(WAIT, manager.shutdown()).await.expect("shutdown should finish");

        assert!(next_event(&mut rx).await.is_detach());
        assert!(manager.attached().await.is_empty());
    }
}
