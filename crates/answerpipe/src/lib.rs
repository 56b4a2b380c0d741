//! `answerpipe`: the stable type surface of the research agent.
//!
//! Re-exports messages, the delta stream, sinks, and search types from
//! `answerpipe-core`. Network implementations live in `answerpipe-local`.

pub use answerpipe_core::*;
