//! Importers from third-party model formats into the IR
//!
//! Importers only translate. The result goes through the same validation as
//! a deserialized IR document, so an imported ensemble satisfies every IR
//! invariant.

pub mod treelite;
