//! Handlers for `/rules` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/rules` | All validation rules |
//! | `POST` | `/rules` | Body: [`NewValidationRule`]; upserts by name, rebuilds the view |
//! | `GET`  | `/rules/{id}` | 404 if not found |
//! | `GET`  | `/rules/{id}/results` | Rows from the rule's backing view |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use tally_core::{
  rules::{NewValidationRule, ValidationRule},
  store::{IndicatorStore, ResultSet},
};

use crate::error::ApiError;

/// `GET /rules`
pub async fn list<S>(
  State(store): State<Arc<S>>,
) -> Result<Json<Vec<ValidationRule>>, ApiError>
where
  S: IndicatorStore,
{
  let rules = store
    .list_rules()
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(rules))
}

/// `POST /rules` — returns 201 + the stored rule with its linked element
/// ids. Saving again under the same name replaces the expressions and
/// regenerates the backing view.
pub async fn create<S>(
  State(store): State<Arc<S>>,
  Json(body): Json<NewValidationRule>,
) -> Result<impl IntoResponse, ApiError>
where
  S: IndicatorStore,
{
  if body.left_expr.trim().is_empty() || body.right_expr.trim().is_empty() {
    return Err(ApiError::BadRequest(
      "rule needs both a left and a right expression".into(),
    ));
  }
  let rule = store
    .save_rule(body)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok((StatusCode::CREATED, Json(rule)))
}

/// `GET /rules/{id}`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<i64>,
) -> Result<Json<ValidationRule>, ApiError>
where
  S: IndicatorStore,
{
  let rule = store
    .get_rule(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("rule {id} not found")))?;
  Ok(Json(rule))
}

/// `GET /rules/{id}/results` — one row per org-hierarchy and period
/// combination, ending in `left_value`, `right_value`, `satisfied`.
pub async fn results<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<i64>,
) -> Result<Json<ResultSet>, ApiError>
where
  S: IndicatorStore,
{
  store
    .get_rule(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("rule {id} not found")))?;

  let results = store
    .rule_results(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(results))
}
