pub mod health;

pub use health::{router, HealthResponse, HealthServer, HealthState, HealthStatus};
