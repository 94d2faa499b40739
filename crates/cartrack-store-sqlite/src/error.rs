//! Error type for `cartrack-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored email no longer passes validation.
  #[error("stored email is invalid: {0}")]
  Email(#[from] cartrack_core::email::EmailError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
