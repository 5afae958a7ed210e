//! Utility helpers shared across the Loft runtime crates.

pub mod async_bridge;
pub mod sequence;

pub use async_bridge::block_on_future;
pub use sequence::Sequence;
