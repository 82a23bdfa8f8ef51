//! Store module - Content-addressed result cache on disk.

mod cache;
mod format;

pub use cache::*;
pub use format::{CompressionType, PayloadHeader, decode_payload, encode_payload};
