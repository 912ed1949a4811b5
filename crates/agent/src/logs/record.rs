use serde::Serialize;

use crate::docker::inventory::ContainerRef;
use crate::docker::stream::StreamKind;

/// One line of container output.
///
/// Serialises as `{"id", "name", "type", "data"}`, the shape downstream
/// log shippers consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub stream: StreamKind,
    /// The line without its trailing newline.
    #[serde(rename = "data")]
    pub text: String,
}

impl LogRecord {
    pub fn new(container: &ContainerRef, stream: StreamKind, text: impl Into<String>) -> Self {
        Self {
            id: container.id.clone(),
            name: container.name.clone(),
            stream,
            text: text.into(),
        }
    }

    /// Build a record from a raw line as read from the stream, newline
    /// included. Invalid UTF-8 is replaced rather than rejected.
    pub fn from_line(container: &ContainerRef, stream: StreamKind, line: &[u8]) -> Self {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        Self::new(container, stream, String::from_utf8_lossy(line))
    }
}
