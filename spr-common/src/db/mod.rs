//! Database initialization, migrations and storage-access helpers

pub mod init;
pub mod migrations;
pub mod monitor;
pub mod retry;

pub use init::*;
pub use migrations::*;
pub use monitor::{begin_monitored, MonitoredTransaction};
pub use retry::{retry_on_lock, LockStats, RetryPolicy};
