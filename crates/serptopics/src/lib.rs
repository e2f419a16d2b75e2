//! Public facade crate for `serptopics`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `serptopics-core`.

pub use serptopics_core::*;
