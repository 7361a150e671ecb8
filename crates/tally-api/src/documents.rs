//! Handler for the `/documents` endpoint.

use std::sync::Arc;

use axum::{Json, extract::State};
use tally_core::{element::SourceDocument, store::IndicatorStore};

use crate::error::ApiError;

/// `GET /documents` — every ingested workbook, newest first.
pub async fn list<S>(
  State(store): State<Arc<S>>,
) -> Result<Json<Vec<SourceDocument>>, ApiError>
where
  S: IndicatorStore,
{
  let documents = store
    .list_source_documents()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(documents))
}
