use meter_store::{domain::UnknownResolution, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// Connection failure, non-2xx response, or a second rate-limit response.
    #[error("transport error: {0}")]
    Transport(String),
    /// Bad resolution, unparsable timestamp, or another caller-side mistake.
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error("credential exchange failed: {0}")]
    Credential(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Fatal errors abort the whole run; everything else only fails the
    /// current meter.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Precondition(_) | Self::Credential(_))
    }
}

impl From<UnknownResolution> for SyncError {
    fn from(e: UnknownResolution) -> Self {
        Self::Precondition(e.to_string())
    }
}
