//! Coordination layer: the breaker controller, flattening, and shutdown

pub mod circuit_breaker;
pub mod executor;
pub mod shutdown;

pub use circuit_breaker::{BreakerStatus, CircuitBreaker, ExitReason, SharedStatus, TickReport};
pub use executor::ActionExecutor;
pub use shutdown::{install_signal_handlers, GracefulShutdown, ReloadHook, ShutdownSignal, ShutdownToken};
