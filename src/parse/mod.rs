//! Pure extractors from captured trace text to metrics.

mod alloc;
mod build_log;
mod instructions;
mod phases;
mod rss;

pub use alloc::*;
pub use build_log::*;
pub use instructions::*;
pub use phases::*;
pub use rss::*;
