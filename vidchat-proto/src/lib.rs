//! Shared data model and JSON wire normalization for `VidChat`.

pub mod message;
pub mod wire;
