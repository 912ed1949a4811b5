// Domain-driven module structure for the logtap agent.

// Core infrastructure
pub mod docker;
pub mod client;
pub mod conf;

// Domain modules
pub mod logs;
pub mod attach;
pub mod runtime;
