//! Core types and trait definitions for the Tally indicator store.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! It owns the domain model (org units, data elements, category combos,
//! fact values, validation rules), the period/calendar utilities, and the
//! query-plan representation that the storage backend renders to SQL.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod element;
pub mod error;
pub mod org;
pub mod period;
pub mod plan;
pub mod rules;
pub mod sql;
pub mod store;

pub use error::{Error, Result};
