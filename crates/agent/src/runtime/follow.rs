//! Follow — one subscription printed as JSON lines, as the `logtap` binary
//! runs it.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::attach::{AttachManager, ListenExit, SubscriptionFilter};
use crate::logs::LogRecord;

/// Run one subscription with `filter`, writing each record to `out` as a
/// JSON line. Returns when the subscription ends by itself (an id-scoped
/// container detached, the manager closed, `out` failed) or when `stop`
/// resolves, after every record received so far has been written.
pub async fn follow<W, S>(
    manager: Arc<AttachManager>,
    filter: SubscriptionFilter,
    capacity: usize,
    out: W,
    stop: S,
) -> Result<(ListenExit, W), JoinError>
where
    W: Write + Send + 'static,
    S: Future<Output = ()>,
{
    let (tx, rx) = mpsc::channel::<LogRecord>(capacity);
    let cancel = CancellationToken::new();
    let mut listener = {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.listen(Some(filter), tx, cancel).await })
    };
    let printer = tokio::spawn(print_records(rx, out));

    let finished = tokio::select! {
        _ = stop => None,
        _ = manager.closed() => {
            warn!("Lost connection to the Docker event stream");
            None
        }
        exit = &mut listener => Some(exit),
    };

    cancel.cancel();
    let exit = match finished {
        Some(exit) => exit?,
        None => listener.await?,
    };
    let out = printer.await?;
    Ok((exit, out))
}

/// Ends once every sender is gone, or on the first write error.
async fn print_records<W: Write>(mut rx: mpsc::Receiver<LogRecord>, mut out: W) -> W {
    while let Some(record) = rx.recv().await {
        let written = serde_json::to_writer(&mut out, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(out))
            .and_then(|_| out.flush());
        if let Err(e) = written {
            warn!("Stopping output: {}", e);
            break;
        }
    }
    out
}
