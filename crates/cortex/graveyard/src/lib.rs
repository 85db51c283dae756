//! Cortex graveyard.
//!
//! Failed approaches are recorded append-only. New failures (a tool error, a
//! session's task description) are ranked against them with a deterministic
//! blend of IDF-weighted keyword overlap, TF-IDF cosine similarity over
//! normalized tokens, and file-path overlap.

#![deny(unsafe_code)]

mod matcher;
pub mod normalize;

pub use matcher::{explain, Graveyard, GraveyardMatch};
pub use normalize::Normalizer;
