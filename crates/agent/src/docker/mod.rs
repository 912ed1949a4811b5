//! Docker module — bollard-backed runtime client.

pub mod client;
pub mod container;
pub mod event;
pub mod inventory;
pub mod stream;

pub use client::{DockerClient, DockerError};
pub use event::RuntimeEvent;
pub use inventory::{short_id, ContainerRef};
pub use stream::{AttachedStreams, StreamKind};
