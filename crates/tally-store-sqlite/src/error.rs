//! Error type for `tally-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tally_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unrecognised {0} discriminant: {1}")]
  Decode(&'static str, String),

  /// The name or alias collides with an existing element's; names and
  /// aliases share one case-insensitive namespace.
  #[error("element name or alias already in use: {0}")]
  ElementNameTaken(String),

  #[error("validation rule not found: {0}")]
  RuleNotFound(i64),

  #[error("query exceeded the configured time limit")]
  QueryTimeout,
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(err: tokio_rusqlite::Error) -> Self {
    // Closures running on the connection thread smuggle domain errors out
    // through `Other`; unwrap them back into their own variants.
    match err {
      tokio_rusqlite::Error::Other(inner) => {
        match inner.downcast::<Error>() {
          Ok(own) => *own,
          Err(inner) => match inner.downcast::<tally_core::Error>() {
            Ok(core) => Self::Core(*core),
            Err(other) => Self::Database(tokio_rusqlite::Error::Other(other)),
          },
        }
      }
      other => Self::Database(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
