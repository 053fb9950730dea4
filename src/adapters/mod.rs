mod gateway;
mod http;
mod hyperliquid;
mod paper;

pub use gateway::GatewayVenue;
pub use hyperliquid::{HyperliquidVenue, DEFAULT_HYPERLIQUID_API};
pub use paper::PaperVenue;
