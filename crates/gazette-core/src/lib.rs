//! Core types, algorithms, and collaborator traits for the Gazette digest
//! engine.
//!
//! Nothing here touches HTTP or a database; the storage backend, the
//! tracking endpoints, and the binary build on these types.

pub mod catalog;
pub mod clock;
pub mod content;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod links;
pub mod model;
pub mod normalize;
pub mod render;
pub mod schedule;
pub mod select;
pub mod store;
pub mod summarize;
pub mod token;

pub use error::{Error, Result};
