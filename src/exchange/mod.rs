pub mod factory;
pub mod registry;
pub mod retry;
mod traits;

pub use factory::{build_registry, build_venue};
pub use registry::VenueRegistry;
pub use retry::{retry_transient, RetryPolicy};
pub use traits::{parse_venue_kind, CloseReport, VenueAdapter, VenueKind, VenueResult};
