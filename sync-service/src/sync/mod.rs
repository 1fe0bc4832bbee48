mod context;
mod engine;

pub use context::SyncContext;
pub use engine::{sync_meter, SyncReport};
