use std::fmt;

use bollard::container::LogOutput;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::sync::DropGuard;

/// Which standard stream of a container a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// The two raw byte streams of a live attachment.
///
/// Returned only once the runtime has acknowledged the attach. Both streams
/// end together when the attachment terminates. Dropping the value releases
/// whatever forwarding task feeds the streams.
pub struct AttachedStreams {
    pub stdout: ByteStream,
    pub stderr: ByteStream,
    forwarder: Option<DropGuard>,
}

impl AttachedStreams {
    pub fn new(
        stdout: impl AsyncRead + Send + Unpin + 'static,
        stderr: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            forwarder: None,
        }
    }

    /// Tie the lifetime of a forwarding task to these streams.
    pub fn with_forwarder(mut self, guard: DropGuard) -> Self {
        self.forwarder = Some(guard);
        self
    }

    pub fn into_parts(self) -> (ByteStream, ByteStream, Option<DropGuard>) {
        (self.stdout, self.stderr, self.forwarder)
    }
}

/// Route one frame of Docker's multiplexed attach output to a stream kind.
///
/// TTY containers produce `Console` frames; those carry what the process
/// wrote to its terminal and count as stdout. `StdIn` frames are echo and
/// are ignored.
pub(crate) fn route_frame(output: LogOutput) -> Option<(StreamKind, Bytes)> {
    match output {
        LogOutput::StdOut { message } => Some((StreamKind::Stdout, message)),
        LogOutput::Console { message } => Some((StreamKind::Stdout, message)),
        LogOutput::StdErr { message } => Some((StreamKind::Stderr, message)),
        LogOutput::StdIn { .. } => None,
    }
}
