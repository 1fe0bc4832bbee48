pub mod credentials;
pub mod meter;
pub mod reading;
pub mod relative_value;
pub mod resolution;
pub mod zone;

pub use credentials::ApiCredentials;
pub use meter::{Meter, TierMarkers};
pub use reading::{daily_averages, ReadingPoint};
pub use relative_value::{RelativeValueRow, RelativeValueTarget};
pub use resolution::{Resolution, UnknownResolution};
pub use zone::{ReportingZone, UnknownZone};
