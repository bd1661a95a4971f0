//! Library target for the `segmux` package.
//!
//! The deliverable is the `segmux` binary (`src/main.rs`); the engine lives in
//! `segmux-engine`.

#[doc(hidden)]
pub use segmux_engine;
