//! Error type shared by the engine, the backend client and the HTTP layer.
//!
//! Fetch failures never surface here: the cascade degrades them to empty lists.
//! What remains is validation (refused before any network call), backend
//! failures of user-triggered calls, and addressing mistakes from the client.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("backend error: {0}")]
  Backend(String),

  #[error("a generation request for this context entry is already running")]
  InFlight,

  #[error("variable '{0}' is bound to a generated input; clear the binding before editing it")]
  ReuseActive(String),

  #[error("context has no open entry of the requested kind")]
  NoOpenDetail,

  #[error("request carries no user identity")]
  MissingIdentity,

  #[error("unknown session")]
  UnknownSession,

  #[error("unknown sub-question index {0}")]
  UnknownSubQuestion(usize),

  #[error("unknown context entry {0}")]
  UnknownDetail(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self {
    Error::Validation(msg.into())
  }

  /// Stable machine-readable code used in HTTP and WebSocket error bodies.
  pub fn code(&self) -> &'static str {
    match self {
      Error::Validation(_) => "validation",
      Error::Backend(_) => "backend",
      Error::InFlight => "in_flight",
      Error::ReuseActive(_) => "reuse_active",
      Error::NoOpenDetail => "no_open_detail",
      Error::MissingIdentity => "missing_identity",
      Error::UnknownSession => "unknown_session",
      Error::UnknownSubQuestion(_) => "unknown_sub_question",
      Error::UnknownDetail(_) => "unknown_detail",
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Error::Backend(e.to_string())
  }
}
