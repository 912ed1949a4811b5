//! Docker client — core struct, constructor, error types.
//!
//! Domain methods live in sibling modules (`container`, `event`) which add
//! `impl DockerClient` blocks.

use bollard::Docker;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("Docker connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Container not found: {0}")]
    ContainerNotFound(String),
    #[error("Malformed container name: {0:?}")]
    MalformedName(String),
    #[error("Attach to container {id} failed: {reason}")]
    AttachFailed { id: String, reason: String },
    #[error("Docker event stream closed")]
    EventStreamClosed,
    #[error("Bollard error: {0}")]
    BollardError(#[from] bollard::errors::Error),
}

impl DockerError {
    /// Rewrite a bollard 404 into `ContainerNotFound` for the given id.
    pub(crate) fn not_found_or(id: &str, err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                DockerError::ContainerNotFound(id.to_string())
            }
            other => DockerError::BollardError(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    /// The bollard Docker client.  `pub(super)` so that domain modules
    /// in sibling files can call bollard APIs directly.
    pub(super) client: Docker,
    /// The socket this client was built for; empty means the platform default.
    socket_path: String,
}

impl DockerClient {
    pub fn new(socket_path: &str) -> Result<Self, DockerError> {
        let connection = if socket_path.is_empty() {
            Docker::connect_with_defaults()
                .map_err(|e| DockerError::ConnectionFailed(e.to_string()))?
        } else {
            let clean_path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(clean_path, 120, &bollard::API_DEFAULT_VERSION)
                .map_err(|e| DockerError::ConnectionFailed(e.to_string()))?
        };

        Ok(DockerClient {
            client: connection,
            socket_path: socket_path.to_string(),
        })
    }

    /// Round-trip to the daemon so connection problems surface before any
    /// long-lived stream is opened.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DockerError::ConnectionFailed(format!("{}: {}", self.endpoint(), e)))
    }

    fn endpoint(&self) -> &str {
        if self.socket_path.is_empty() {
            "default socket"
        } else {
            &self.socket_path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_404() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "no such container".to_string(),
        };
        match DockerError::not_found_or("abc123456789", err) {
            DockerError::ContainerNotFound(id) => assert_eq!(id, "abc123456789"),
            other => panic!("Expected ContainerNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_not_found_keeps_other_errors() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(matches!(
            DockerError::not_found_or("abc", err),
            DockerError::BollardError(_)
        ));
    }

    #[tokio::test]
    async fn test_endpoint_names_socket() {
        let client = DockerClient::new("unix:///tmp/logtap-test.sock").unwrap();
        assert_eq!(client.endpoint(), "unix:///tmp/logtap-test.sock");
    }

    #[test]
    fn test_attach_failed_message() {
        let err = DockerError::AttachFailed {
            id: "abc123456789".to_string(),
            reason: "upgrade refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123456789"));
        assert!(msg.contains("upgrade refused"));
    }
}
