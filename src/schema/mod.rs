//! Schema module - Configuration, job and result types.

mod config;
mod dataset;
mod job;
mod scores;
mod search;
mod tuning;

pub use config::*;
pub use dataset::*;
pub use job::*;
pub use scores::*;
pub use search::*;
pub use tuning::*;
