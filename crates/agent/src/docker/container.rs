//! Container domain — list, inspect, and attach to live output.

use super::client::{DockerClient, DockerError};
use super::inventory::ContainerRef;
use super::stream::{route_frame, AttachedStreams, StreamKind};

use bollard::container::LogOutput;
use bollard::query_parameters::{AttachContainerOptionsBuilder, ListContainersOptions};
use futures_util::stream::{Stream, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Per-stream pipe buffer between the attach socket and the pump.
const PIPE_CAPACITY: usize = 64 * 1024;

impl DockerClient {
    /// List running containers. Entries whose name cannot be parsed are
    /// skipped with a warning.
    pub async fn list_running(&self) -> Result<Vec<ContainerRef>, DockerError> {
        let options = Some(ListContainersOptions {
            all: false,
            ..Default::default()
        });
        let containers = self.client.list_containers(options).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| match ContainerRef::try_from(c) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(error = %e, "Skipping container with unusable metadata");
                    None
                }
            })
            .collect())
    }

    pub async fn inspect(&self, id: &str) -> Result<ContainerRef, DockerError> {
        let details = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| DockerError::not_found_or(id, e))?;
        ContainerRef::try_from(details)
    }

    /// Attach to a container's live output.
    ///
    /// Resolves once the daemon has accepted the connection upgrade; an
    /// error here means the attachment never started. The multiplexed
    /// output is split into two pipes by a forwarding task which lives as
    /// long as the returned streams.
    pub async fn attach(
        &self,
        id: &str,
        want_stdout: bool,
        want_stderr: bool,
    ) -> Result<AttachedStreams, DockerError> {
        let options = AttachContainerOptionsBuilder::default()
            .stream(true)
            .logs(false)
            .stdin(false)
            .stdout(want_stdout)
            .stderr(want_stderr)
            .build();

        let results = self
            .client
            .attach_container(id, Some(options))
            .await
            .map_err(|e| match DockerError::not_found_or(id, e) {
                DockerError::BollardError(other) => DockerError::AttachFailed {
                    id: id.to_string(),
                    reason: other.to_string(),
                },
                not_found => not_found,
            })?;

        let (stdout_tx, stdout_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_tx, stderr_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(forward_output(
            id.to_string(),
            results.output,
            stdout_tx,
            stderr_tx,
            cancel.clone(),
        ));

        Ok(AttachedStreams::new(stdout_rx, stderr_rx).with_forwarder(cancel.drop_guard()))
    }
}

/// Copy attach frames into the per-stream pipes until the runtime stream
/// ends, fails, or the consumer goes away. Returning drops both pipe
/// writers, which the reading side observes as end-of-stream.
async fn forward_output<S>(
    id: String,
    mut output: S,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send + Unpin + 'static,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = output.next() => frame,
        };

        let (kind, bytes) = match frame {
            Some(Ok(frame)) => match route_frame(frame) {
                Some(routed) => routed,
                None => continue,
            },
            Some(Err(e)) => {
                debug!(container_id = %id, error = %e, "Attach stream failed");
                break;
            }
            None => break,
        };

        let sink = match kind {
            StreamKind::Stdout => &mut stdout,
            StreamKind::Stderr => &mut stderr,
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            written = sink.write_all(&bytes) => written,
        };
        if written.is_err() {
            break;
        }
    }
    debug!(container_id = %id, "Attach forwarder finished");
}
