//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("unprocessable: {0}")]
  Unprocessable(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Classify a store failure: planner errors caused by the request itself
/// (unknown columns, a frame the data cannot fill, missing periods) map
/// to 400, everything else stays a 500.
pub(crate) fn store_error<E>(err: E) -> ApiError
where
  E: std::error::Error + Send + Sync + 'static,
{
  use tally_core::Error as Core;

  let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
  while let Some(e) = source {
    if let Some(core) = e.downcast_ref::<Core>()
      && matches!(
        core,
        Core::NoElements
          | Core::OrgLevelTooDeep { .. }
          | Core::PeriodsRequired { .. }
          | Core::UnknownColumn(_)
          | Core::Expression { .. }
          | Core::PeriodFormat(_)
          | Core::QuarterFormat(_)
      )
    {
      return ApiError::BadRequest(core.to_string());
    }
    source = e.source();
  }
  ApiError::Store(Box::new(err))
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Unprocessable(m) => {
        (StatusCode::UNPROCESSABLE_ENTITY, m.clone())
      }
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn planner_errors_map_to_bad_request() {
    let err = tally_core::Error::PeriodsRequired { element: "A".into() };
    assert!(matches!(store_error(err), ApiError::BadRequest(m) if m.contains("A")));
  }

  #[test]
  fn opaque_failures_stay_internal() {
    let err = std::io::Error::other("disk fell off");
    assert!(matches!(store_error(err), ApiError::Store(_)));
  }
}
