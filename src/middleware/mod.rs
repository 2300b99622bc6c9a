//! Middleware layer.
//!
//! The pipeline every routed request runs through, in order:
//!
//! - [`cors`]: optional `tower-http` CORS policy around the whole service
//! - [`recover`]: outer and inner panic boundaries
//! - [`journal`]: correlation id on entry, one journal record on exit
//! - [`rate`]: optional token bucket consulted before any handler
//! - [`unify`]: one JSON envelope per request
//!
//! The metrics hook runs between the unifier and the journal record; see
//! [`crate::metrics`].

pub(crate) mod cors;
pub mod journal;
pub mod rate;
pub(crate) mod recover;
pub(crate) mod unify;
