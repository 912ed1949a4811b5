//! Runtime module — process lifecycle: boot, follow, shutdown.

pub mod boot;
pub mod follow;
pub mod stop;
