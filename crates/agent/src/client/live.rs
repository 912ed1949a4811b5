//! Live — implements `RuntimeOps` for the real Bollard-backed `DockerClient`.

use crate::client::docker::{BoxFuture, EventStream, RuntimeOps};
use crate::docker::client::{DockerClient, DockerError};
use crate::docker::inventory::ContainerRef;
use crate::docker::stream::AttachedStreams;

impl RuntimeOps for DockerClient {
    fn list_running(&self) -> BoxFuture<'_, Result<Vec<ContainerRef>, DockerError>> {
        Box::pin(DockerClient::list_running(self))
    }

    fn inspect<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ContainerRef, DockerError>> {
        Box::pin(DockerClient::inspect(self, id))
    }

    fn events(&self) -> BoxFuture<'_, Result<EventStream<'_>, DockerError>> {
        Box::pin(async move {
            let stream = DockerClient::events(self).await?;
            Ok(Box::pin(stream) as EventStream<'_>)
        })
    }

    fn attach<'a>(
        &'a self,
        id: &'a str,
        want_stdout: bool,
        want_stderr: bool,
    ) -> BoxFuture<'a, Result<AttachedStreams, DockerError>> {
        Box::pin(DockerClient::attach(self, id, want_stdout, want_stderr))
    }
}
