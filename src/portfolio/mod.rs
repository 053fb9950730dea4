mod aggregator;
mod baseline;

pub use aggregator::PortfolioAggregator;
pub use baseline::BaselineTracker;
