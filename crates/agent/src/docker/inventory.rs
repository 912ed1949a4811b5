use bollard::models::{ContainerInspectResponse, ContainerSummary};
use serde::Serialize;

use super::client::DockerError;

/// Length of the short container id Docker shows in `docker ps`.
pub const SHORT_ID_LEN: usize = 12;

/// Identity of a container as seen by the attach machinery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContainerRef {
    pub id: String,   // Short 12-char id
    pub name: String, // Without leading slash
}

impl ContainerRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }

    /// Build a ref from raw runtime values: truncates the id and strips the
    /// `/` Docker puts in front of every container name.
    ///
    /// Names without the leading separator, or with nothing after it, are
    /// rejected instead of being sliced blindly.
    pub fn from_runtime(id: &str, raw_name: &str) -> Result<Self, DockerError> {
        let name = raw_name
            .strip_prefix('/')
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DockerError::MalformedName(raw_name.to_string()))?;
        Ok(Self::new(short_id(id), name))
    }
}

/// Truncate a canonical container id to its short form.
/// Ids already shorter than [`SHORT_ID_LEN`] are returned whole.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

impl TryFrom<ContainerSummary> for ContainerRef {
    type Error = DockerError;

    fn try_from(s: ContainerSummary) -> Result<Self, Self::Error> {
        let id = s.id.unwrap_or_default();
        let name = s.names.as_deref()             // Turn Option<Vec> into Option<&[String]>
            .and_then(|n| n.first())
            .cloned()
            .unwrap_or_default();
        Self::from_runtime(&id, &name)
    }
}

impl TryFrom<ContainerInspectResponse> for ContainerRef {
    type Error = DockerError;

    fn try_from(details: ContainerInspectResponse) -> Result<Self, Self::Error> {
        let id = details.id.unwrap_or_default();
        let name = details.name.unwrap_or_default();
        Self::from_runtime(&id, &name)
    }
}
