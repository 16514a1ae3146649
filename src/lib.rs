//! Cascading change propagation from root planning documents to the
//! documents derived from them.
//!
//! Proposed edits to a root are recorded as pending changes ([`intake`]),
//! classified against the root's derived documents ([`impact`]), and then
//! applied or rejected in batches ([`cascade`]). [`review::ReviewService`]
//! ties these together for callers; [`api`] exposes it over HTTP.

pub mod api;
pub mod cascade;
pub mod config;
pub mod db;
pub mod error;
pub mod impact;
pub mod intake;
pub mod locks;
pub mod models;
pub mod regen;
pub mod review;
