//! `kotoba-worker`: process wiring for the enrichment pipeline.
//!
//! The binary owns start-up and shutdown; this library holds the pieces that
//! are worth testing on their own, chiefly the operational HTTP router.

pub mod ops;

pub use ops::{router, AppState};
