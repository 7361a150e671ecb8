//! Error type for `tally-ingest`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("spreadsheet error: {0}")]
  Spreadsheet(#[from] calamine::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
  /// Wrap a backend error; ingestion is generic over the store.
  pub(crate) fn store(
    err: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
