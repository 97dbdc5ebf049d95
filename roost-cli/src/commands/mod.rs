//! Command implementations.

pub mod feed;
pub mod message;
