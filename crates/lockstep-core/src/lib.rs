//! `lockstep-core` — configuration, clocks, durations and node identity shared
//! by the lock manager, the scheduler and the node binary.

pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use types::NodeId;
