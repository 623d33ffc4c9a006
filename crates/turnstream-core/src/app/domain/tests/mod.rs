//! Domain tests module.
//!
//! - Property tests: proptest-based invariants of the fold and normalizers
//! - Replay tests: batch-split and reconnect equivalence of the fold

mod property;
