//! Listen — a long-lived subscription that follows matching containers and
//! forwards their log records to a caller-owned channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::event::{LifecycleEvent, LifecycleKind};
use super::filter::SubscriptionFilter;
use super::manager::AttachManager;
use crate::logs::fanout::{OverflowPolicy, SubscriberId};
use crate::logs::pump::{ListenerId, LogPump};
use crate::logs::record::LogRecord;

// Only sizes the queue; lifecycle events to a subscription are never
// dropped, whatever the manager's overflow policy.
const EVENT_QUEUE: usize = 64;

/// Why a [`AttachManager::listen`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenExit {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The container an id-scoped filter follows detached.
    Detached,
    /// The manager shut down.
    Shutdown,
    /// The caller dropped the receiving end of the output channel.
    OutputClosed,
}

/// A listener registration on one pump, removed when released or dropped.
struct ListenerGuard {
    pump: Arc<LogPump>,
    id: ListenerId,
    released: bool,
}

impl ListenerGuard {
    fn new(pump: Arc<LogPump>, id: ListenerId) -> Self {
        Self { pump, id, released: false }
    }

    async fn release(mut self) {
        self.pump.remove_listener(self.id).await;
        self.released = true;
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if self.released || self.pump.try_remove_listener(self.id).is_some() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pump = Arc::clone(&self.pump);
            let id = self.id;
            handle.spawn(async move {
                pump.remove_listener(id).await;
            });
        }
    }
}

/// The lifecycle-event registration of one subscription.
struct EventGuard {
    manager: Arc<AttachManager>,
    id: SubscriberId,
    released: bool,
}

impl EventGuard {
    async fn release(mut self) {
        self.manager.unsubscribe_events(self.id).await;
        self.released = true;
    }
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        if self.released || self.manager.try_unsubscribe_events(self.id).is_some() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let manager = Arc::clone(&self.manager);
            let id = self.id;
            handle.spawn(async move {
                manager.unsubscribe_events(id).await;
            });
        }
    }
}

impl AttachManager {
    /// Follow every container matching `filter` (all containers when
    /// `None`), forwarding their log lines to `output` until one of the
    /// [`ListenExit`] conditions occurs.
    ///
    /// All registrations made on the way are undone before returning, and
    /// also if the calling task is aborted mid-way.
    pub async fn listen(
        self: &Arc<Self>,
        filter: Option<SubscriptionFilter>,
        output: mpsc::Sender<LogRecord>,
        cancel: CancellationToken,
    ) -> ListenExit {
        let filter = filter.unwrap_or_default();
        let (tx, mut events) = mpsc::channel(EVENT_QUEUE);
        let subscription = EventGuard {
            manager: Arc::clone(self),
            id: self.subscribe_events_with(tx, OverflowPolicy::Block).await,
            released: false,
        };
        let mut listening: HashMap<String, ListenerGuard> = HashMap::new();

        let exit = loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break ListenExit::Cancelled,
                _ = self.closed() => break ListenExit::Shutdown,
                _ = output.closed() => break ListenExit::OutputClosed,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break ListenExit::Shutdown,
                },
            };

            if let Some(exit) = self.on_event(&filter, &output, &mut listening, event).await {
                break exit;
            }
        };

        for (_, guard) in listening.drain() {
            guard.release().await;
        }
        subscription.release().await;
        debug!(?exit, "Subscription ended");
        exit
    }

    async fn on_event(
        &self,
        filter: &SubscriptionFilter,
        output: &mpsc::Sender<LogRecord>,
        listening: &mut HashMap<String, ListenerGuard>,
        event: LifecycleEvent,
    ) -> Option<ListenExit> {
        match event.kind {
            LifecycleKind::Attach if filter.matches(&event) => {
                // A replayed attach may race with the container going away.
                let Some(pump) = self.lookup(&event.id).await else {
                    debug!(container_id = %event.id, "Attached container already gone");
                    return None;
                };
                if listening.get(&event.id).is_some_and(|g| Arc::ptr_eq(&g.pump, &pump)) {
                    return None;
                }
                let id = pump.add_listener(output.clone()).await;
                debug!(container_id = %event.id, name = %event.name, "Listening");
                if let Some(stale) = listening.insert(event.id, ListenerGuard::new(pump, id)) {
                    stale.release().await;
                }
                None
            }
            LifecycleKind::Attach => None,
            LifecycleKind::Detach => {
                if let Some(guard) = listening.remove(&event.id) {
                    guard.release().await;
                }
                filter.ends_on(&event).then_some(ListenExit::Detached)
            }
        }
    }
}
