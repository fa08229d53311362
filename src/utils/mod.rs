pub mod client_ip;
pub mod graceful_shutdown;
pub mod json_file;

pub use client_ip::{ClientIdentity, resolve_client_ip};
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
