mod detector;

pub use detector::{evaluate, pnl_limits};
