pub mod catalog;
pub mod client;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod metrics_server;
pub mod observability;
pub mod relative;
pub mod retention;
pub mod scheduler;
pub mod series;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use error::SyncError;
pub use sync::SyncContext;
