//! Event domain — Docker engine container events.

use super::client::{DockerClient, DockerError};
use futures_util::stream::StreamExt;

/// A container event from the runtime, reduced to what discovery needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// Event action, e.g. `"start"`, `"die"`, `"destroy"`.
    pub status: String,
    /// Canonical (full-length) container id.
    pub id: String,
}

impl RuntimeEvent {
    pub fn new(status: impl Into<String>, id: impl Into<String>) -> Self {
        Self { status: status.into(), id: id.into() }
    }

    pub fn is_start(&self) -> bool {
        self.status == "start"
    }
}

impl TryFrom<bollard::models::EventMessage> for RuntimeEvent {
    type Error = ();

    fn try_from(msg: bollard::models::EventMessage) -> Result<Self, Self::Error> {
        let id = msg.actor.and_then(|a| a.id).ok_or(())?;
        let status = msg.action.unwrap_or_default();
        Ok(Self { status, id })
    }
}

impl DockerClient {
    /// Subscribe to container events.
    ///
    /// Pings the daemon first so that an unreachable runtime is reported
    /// here rather than as the first item of the stream.
    pub async fn events(
        &self,
    ) -> Result<impl futures_util::Stream<Item = Result<RuntimeEvent, DockerError>> + '_, DockerError>
    {
        use bollard::query_parameters::EventsOptionsBuilder;
        use std::collections::HashMap;

        self.ping().await?;

        let mut filters = HashMap::new();
        filters.insert("type", vec!["container"]);
        let options = EventsOptionsBuilder::default().filters(&filters).build();

        Ok(self
            .client
            .events(Some(options))
            .filter_map(|r| async move {
                match r {
                    Ok(msg) => RuntimeEvent::try_from(msg).ok().map(Ok),
                    Err(e) => Some(Err(DockerError::from(e))),
                }
            }))
    }
}
