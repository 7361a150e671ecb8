//! Handlers for the report-synthesis endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/pivot` | Body: [`PivotRequest`]; one column per element |
//! | `POST` | `/calculation` | Body: [`CalculationRequest`]; derived columns over the pivot |
//!
//! Both return `{"columns": [..], "rows": [[..]]}` with SQL NULLs preserved
//! as JSON nulls.

use std::sync::Arc;

use axum::{Json, extract::State};
use tally_core::store::{
  CalculationRequest, IndicatorStore, PivotRequest, ResultSet,
};

use crate::error::{ApiError, store_error};

/// `POST /pivot`
///
/// Org level defaults to the coarsest among the named elements, granularity
/// to the finest.
pub async fn pivot<S>(
  State(store): State<Arc<S>>,
  Json(request): Json<PivotRequest>,
) -> Result<Json<ResultSet>, ApiError>
where
  S: IndicatorStore,
{
  if request.elements.is_empty() {
    return Err(ApiError::BadRequest("no elements named".into()));
  }
  let result = store.pivot(request).await.map_err(store_error)?;
  Ok(Json(result))
}

/// `POST /calculation`
pub async fn calculation<S>(
  State(store): State<Arc<S>>,
  Json(request): Json<CalculationRequest>,
) -> Result<Json<ResultSet>, ApiError>
where
  S: IndicatorStore,
{
  if request.elements.is_empty() {
    return Err(ApiError::BadRequest("no elements named".into()));
  }
  if request.expressions.is_empty() {
    return Err(ApiError::BadRequest("no expressions given".into()));
  }
  let result = store.calculation(request).await.map_err(store_error)?;
  Ok(Json(result))
}
