//! Gazette: polls content sources, builds summarised digests, and mails
//! them to recipient groups with signed open, click, and unsubscribe links.
//!
//! The [`app::App`] bundle wires a [`DigestStore`](gazette_core::store::DigestStore)
//! to its fetcher, summariser, mailer, and renderer; the `gazette` binary
//! drives it from the command line or from the [`scheduler`].

pub mod app;
pub mod build;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod mail;
pub mod maintenance;
pub mod render;
pub mod scheduler;
pub mod settings;
pub mod summarizers;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
