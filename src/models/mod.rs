//! Domain models for plan-cascade.
//!
//! # Core Concepts
//!
//! ## Document Graph
//!
//! - [`RootDocument`]: The source-of-truth planning record. Its fields only
//!   change through accepted [`PendingChange`]s.
//! - [`DerivedDocument`]: A deliverable (presentation, financial model, ...)
//!   that declares which root fields it inherits.
//!
//! ## Change Flow
//!
//! - [`PendingChange`]: An immutable proposed edit with provenance, resolved
//!   exactly once.
//! - [`ImpactRecord`]: Computed, never stored. Which derived documents a
//!   selection of changes affects, how badly, and under which policy.
//! - [`ApplyResult`]: What an apply call merged, cascaded and flagged.
//! - [`CascadeEvent`]: Append-only log of cascades reaching a derived document.

mod change;
mod derived;
mod field;
mod impact;
mod root;

pub use change::*;
pub use derived::*;
pub use field::*;
pub use impact::*;
pub use root::*;
