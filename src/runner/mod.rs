//! Runners drive the coordinator with many concurrent transfers and record
//! how each attempt went.
//!
//! * [`run_experiment`] - randomized load runs over an account pool
//! * [`replay`] - streams transfer requests from a CSV file
//!
mod load;
mod replay;

pub use load::{run_experiment, summarize};
pub use replay::replay;
