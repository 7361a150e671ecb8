//! JSON REST API for Tally.
//!
//! Exposes an axum [`Router`] backed by any
//! [`tally_core::store::IndicatorStore`]. Auth, TLS, and transport concerns
//! are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tally_api::api_router(store.clone()))
//! ```

pub mod documents;
pub mod elements;
pub mod error;
pub mod reports;
pub mod rules;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use tally_core::store::IndicatorStore;

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: IndicatorStore + 'static,
{
  Router::new()
    // Elements
    .route("/elements", get(elements::list::<S>).post(elements::create::<S>))
    .route("/metadata", get(elements::metadata::<S>))
    // Reports
    .route("/pivot", post(reports::pivot::<S>))
    .route("/calculation", post(reports::calculation::<S>))
    // Validation rules
    .route("/rules", get(rules::list::<S>).post(rules::create::<S>))
    .route("/rules/{id}", get(rules::get_one::<S>))
    .route("/rules/{id}/results", get(rules::results::<S>))
    // Source documents
    .route("/documents", get(documents::list::<S>))
    .with_state(store)
}
