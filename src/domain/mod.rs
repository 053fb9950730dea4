pub mod breach;
pub mod position;
pub mod snapshot;
pub mod state;

pub use breach::*;
pub use position::*;
pub use snapshot::*;
pub use state::*;
