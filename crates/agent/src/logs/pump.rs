//! Pump — turns one attachment's stdout/stderr bytes into [`LogRecord`]s
//! and fans them out to the pump's listeners.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fanout::{Fanout, OverflowPolicy, SubscriberId};
use super::record::LogRecord;
use crate::docker::inventory::ContainerRef;
use crate::docker::stream::{AttachedStreams, ByteStream, StreamKind};

pub type ListenerId = SubscriberId;

pub struct LogPump {
    container: ContainerRef,
    listeners: Mutex<Fanout<LogRecord>>,
}

impl LogPump {
    pub fn new(container: ContainerRef, policy: OverflowPolicy) -> Self {
        Self {
            container,
            listeners: Mutex::new(Fanout::new(policy)),
        }
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    pub async fn add_listener(&self, tx: mpsc::Sender<LogRecord>) -> ListenerId {
        self.listeners.lock().await.subscribe(tx)
    }

    /// Once this returns, no later fan-out pass reaches the listener.
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().await.unsubscribe(id)
    }

    /// Non-blocking removal for drop paths. Returns `None` when the lock is
    /// busy and the caller has to retry asynchronously.
    pub(crate) fn try_remove_listener(&self, id: ListenerId) -> Option<bool> {
        self.listeners.try_lock().ok().map(|mut l| l.unsubscribe(id))
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.lock().await.len()
    }

    /// Read both streams until each hits end-of-stream or a read error, or
    /// until `cancel` fires. Neither outcome is reported; the caller only
    /// learns that the attachment is over.
    pub async fn run(&self, streams: AttachedStreams, cancel: CancellationToken) {
        // The forwarder guard stays alive until both loops are done.
        let (stdout, stderr, _forwarder) = streams.into_parts();
        tokio::join!(
            self.pump(StreamKind::Stdout, stdout, &cancel),
            self.pump(StreamKind::Stderr, stderr, &cancel),
        );
    }

    async fn pump(&self, kind: StreamKind, source: ByteStream, cancel: &CancellationToken) {
        let mut reader = BufReader::new(source);
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut line) => read,
            };
            match read {
                Ok(0) => break,
                // Unterminated tail at end-of-stream is dropped.
                Ok(_) if line.last() != Some(&b'\n') => break,
                Ok(_) => {
                    let record = LogRecord::from_line(&self.container, kind, &line);
                    self.listeners.lock().await.broadcast(&record).await;
                }
                Err(e) => {
                    debug!(container_id = %self.container.id, stream = %kind, error = %e, "Read failed");
                    break;
                }
            }
        }
        debug!(container_id = %self.container.id, stream = %kind, "Stream finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn webapp() -> ContainerRef {
        ContainerRef::new("abc123456789", "webapp")
    }

    fn pipes() -> (DuplexStream, DuplexStream, AttachedStreams) {
        let (out_w, out_r) = tokio::io::duplex(1024);
        let (err_w, err_r) = tokio::io::duplex(1024);
        (out_w, err_w, AttachedStreams::new(out_r, err_r))
    }

    async fn drain(rx: &mut mpsc::Receiver<LogRecord>) -> Vec<LogRecord> {
        let mut out = Vec::new();
        while let Ok(r) = rx.try_recv() {
            out.push(r);
        }
        out
    }

    #[tokio::test]
    async fn test_lines_split_and_tagged() {
        let pump = LogPump::new(webapp(), OverflowPolicy::Block);
        let (tx, mut rx) = mpsc::channel(16);
        pump.add_listener(tx).await;

        let (mut out_w, mut err_w, streams) = pipes();
        out_w.write_all(b"hello\nwor").await.unwrap();
        out_w.write_all(b"ld\n").await.unwrap();
        err_w.write_all(b"oops\n").await.unwrap();
        drop(out_w);
        drop(err_w);

        pump.run(streams, CancellationToken::new()).await;

        let records = drain(&mut rx).await;
        let stdout: Vec<_> = records.iter().filter(|r| r.stream == StreamKind::Stdout).map(|r| r.text.as_str()).collect();
        let stderr: Vec<_> = records.iter().filter(|r| r.stream == StreamKind::Stderr).map(|r| r.text.as_str()).collect();
        assert_eq!(stdout, vec!["hello", "world"]);
        assert_eq!(stderr, vec!["oops"]);
        assert!(records.iter().all(|r| r.id == "abc123456789" && r.name == "webapp"));
    }

    #[tokio::test]
    async fn test_partial_tail_dropped() {
        let pump = LogPump::new(webapp(), OverflowPolicy::Block);
        let (tx, mut rx) = mpsc::channel(16);
        pump.add_listener(tx).await;

        let (mut out_w, err_w, streams) = pipes();
        out_w.write_all(b"complete\nincomplete").await.unwrap();
        drop(out_w);
        drop(err_w);

        pump.run(streams, CancellationToken::new()).await;

        let texts: Vec<_> = drain(&mut rx).await.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, vec!["complete"]);
    }

    #[tokio::test]
    async fn test_two_listeners_see_same_sequence() {
        let pump = LogPump::new(webapp(), OverflowPolicy::Block);
        let (tx1, mut rx1) = mpsc::channel(64);
        let (tx2, mut rx2) = mpsc::channel(64);
        pump.add_listener(tx1).await;
        pump.add_listener(tx2).await;

        let (mut out_w, err_w, streams) = pipes();
        for n in 0..20 {
            out_w.write_all(format!("line {}\n", n).as_bytes()).await.unwrap();
        }
        drop(out_w);
        drop(err_w);

        pump.run(streams, CancellationToken::new()).await;

        let a = drain(&mut rx1).await;
        let b = drain(&mut rx2).await;
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
        assert_eq!(a[19].text, "line 19");
    }

    #[tokio::test]
    async fn test_removed_listener_gets_nothing_more() {
        let pump = Arc::new(LogPump::new(webapp(), OverflowPolicy::Block));
        let (tx, mut rx) = mpsc::channel(16);
        let id = pump.add_listener(tx).await;

        let (mut out_w, err_w, streams) = pipes();
        let runner = {
            let pump = Arc::clone(&pump);
            tokio::spawn(async move { pump.run(streams, CancellationToken::new()).await })
        };

        out_w.write_all(b"first\n").await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first.unwrap().text, "first");

        assert!(pump.remove_listener(id).await);
        assert_eq!(pump.listener_count().await, 0);
        out_w.write_all(b"second\n").await.unwrap();
        drop(out_w);
        drop(err_w);
        runner.await.unwrap();

        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let pump = LogPump::new(webapp(), OverflowPolicy::Block);
        let (_out_w, _err_w, streams) = pipes();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), pump.run(streams, cancel))
            .await
            .expect("run should return once cancelled");
    }

    #[tokio::test]
    async fn test_try_remove_listener() {
        let pump = LogPump::new(webapp(), OverflowPolicy::Block);
        let (tx, _rx) = mpsc::channel(1);
        let id = pump.add_listener(tx).await;
        assert_eq!(pump.try_remove_listener(id), Some(true));
        assert_eq!(pump.try_remove_listener(id), Some(false));
    }
}
