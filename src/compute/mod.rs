//! Compute module - Expansion, evaluation and search.

mod batch;
mod classify;
mod data;
mod expand;
mod fingerprint;
mod folds;
mod model;
mod scoring;

pub mod evolution;

pub use batch::*;
pub use classify::*;
pub use data::*;
pub use expand::*;
pub use fingerprint::*;
pub use folds::*;
pub use model::*;
pub use scoring::*;
