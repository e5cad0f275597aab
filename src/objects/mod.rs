//! Content-addressed commit storage.
//!
//! Commits are immutable and keyed by their id, so every endpoint of a
//! topology can share one store. Which commits an endpoint can see is
//! decided entirely by its refs.

mod graph;

pub use graph::ObjectStore;
