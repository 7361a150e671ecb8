//! Handlers for `/elements` and `/metadata` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/elements` | All data elements |
//! | `POST` | `/elements` | Body: [`CreateBody`]; 422 on a taken name or alias |
//! | `GET`  | `/metadata?names=a,b` | Metadata for named elements; factless ones omitted |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use tally_core::{
  element::{
    AggregationMethod, DataElement, ElementMeta, NewDataElement, ValueType,
  },
  store::IndicatorStore,
};

use crate::error::ApiError;

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /elements`
pub async fn list<S>(
  State(store): State<Arc<S>>,
) -> Result<Json<Vec<DataElement>>, ApiError>
where
  S: IndicatorStore,
{
  let elements = store
    .list_elements()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(elements))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /elements`.
#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name:               String,
  pub alias:              Option<String>,
  pub value_type:         Option<ValueType>,
  pub value_min:          Option<f64>,
  pub value_max:          Option<f64>,
  pub aggregation_method: Option<AggregationMethod>,
}

impl From<CreateBody> for NewDataElement {
  fn from(b: CreateBody) -> Self {
    NewDataElement {
      name:               b.name,
      alias:              b.alias,
      value_type:         b.value_type.unwrap_or(ValueType::Number),
      value_min:          b.value_min,
      value_max:          b.value_max,
      aggregation_method: b.aggregation_method.unwrap_or_default(),
    }
  }
}

/// `POST /elements` — returns 201 + the stored element.
///
/// Names and aliases share one case-insensitive namespace; a taken name is
/// a 422, not a 500.
pub async fn create<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IndicatorStore,
{
  for candidate in
    std::iter::once(&body.name).chain(body.alias.as_ref())
  {
    let taken = store
      .find_element(candidate.clone())
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?;
    if taken.is_some() {
      return Err(ApiError::Unprocessable(format!(
        "element name or alias already in use: {candidate}"
      )));
    }
  }

  let element = store
    .create_element(NewDataElement::from(body))
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok((StatusCode::CREATED, Json(element)))
}

// ─── Metadata ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MetadataParams {
  /// Comma-separated element names or aliases.
  pub names: String,
}

/// `GET /metadata?names=a,b`
pub async fn metadata<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<MetadataParams>,
) -> Result<Json<Vec<ElementMeta>>, ApiError>
where
  S: IndicatorStore,
{
  let names: Vec<String> = params
    .names
    .split(',')
    .map(str::trim)
    .filter(|n| !n.is_empty())
    .map(str::to_owned)
    .collect();
  if names.is_empty() {
    return Err(ApiError::BadRequest("no element names given".into()));
  }

  let metas = store
    .element_meta(names)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(metas))
}
