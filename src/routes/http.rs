//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs ids and basic result info.
//!
//! The caller's identity comes from the `x-user-id` / `x-user-name` headers set
//! by the fronting identity provider.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::logic::{apply_command, load_catalog};
use crate::protocol::*;
use crate::session::Identity;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match &self {
      Error::Validation(_) | Error::ReuseActive(_) | Error::NoOpenDetail => StatusCode::UNPROCESSABLE_ENTITY,
      Error::MissingIdentity => StatusCode::UNAUTHORIZED,
      Error::UnknownSession | Error::UnknownSubQuestion(_) | Error::UnknownDetail(_) => StatusCode::NOT_FOUND,
      Error::InFlight => StatusCode::CONFLICT,
      Error::Backend(_) => StatusCode::BAD_GATEWAY,
    };
    if status.is_server_error() {
      warn!(target: "qforge_backend", code = self.code(), error = %self, "Request failed");
    }
    (status, Json(ErrorOut::from(&self))).into_response()
  }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
}

/// Identity from request headers; `fallback_user` covers clients that cannot
/// set headers (browser WebSockets).
pub fn identity_from(headers: &HeaderMap, fallback_user: Option<String>) -> Result<Identity, Error> {
  let user_id = header(headers, USER_ID_HEADER)
    .or(fallback_user.filter(|u| !u.is_empty()))
    .ok_or(Error::MissingIdentity)?;
  Ok(Identity { user_id, display_name: header(headers, USER_NAME_HEADER) })
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let catalog = load_catalog(state.backend.as_ref()).await;
  info!(target: "qforge_backend", topics = catalog.topics.len(), inputs = catalog.inputs.len(), "HTTP catalog served");
  Json(catalog)
}

#[instrument(level = "info", skip(state, headers, body))]
pub async fn http_create_session(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  body: Option<Json<CreateSessionIn>>,
) -> Result<impl IntoResponse, Error> {
  let identity = identity_from(&headers, None)?;
  let body = body.map(|Json(b)| b).unwrap_or_default();
  let handle = state.open_session(identity, body).await?;
  let snapshot = handle.lock().await.snapshot();
  Ok((StatusCode::CREATED, Json(snapshot)))
}

#[instrument(level = "info", skip(state, headers), fields(%id))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
  let identity = identity_from(&headers, None)?;
  let handle = state.session(id, &identity).await?;
  let snapshot = handle.lock().await.snapshot();
  Ok(Json(snapshot))
}

#[instrument(level = "info", skip(state, headers), fields(%id))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
  let identity = identity_from(&headers, None)?;
  state.discard_session(id, &identity).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[instrument(level = "info", skip(state, headers, cmd), fields(%id, command = cmd.name()))]
pub async fn http_post_command(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(id): Path<Uuid>,
  Json(cmd): Json<Command>,
) -> Result<impl IntoResponse, Error> {
  let identity = identity_from(&headers, None)?;
  let handle = state.session(id, &identity).await?;
  let out = apply_command(&handle, state.backend.as_ref(), cmd).await?;
  Ok(Json(out))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::fake::FakeBackend;
  use crate::config::ServiceConfig;
  use crate::domain::Topic;
  use crate::routes::build_router;
  use axum::body::{to_bytes, Body};
  use axum::http::Request;
  use serde_json::{json, Value};
  use tower::ServiceExt;

  fn app() -> axum::Router {
    let backend = FakeBackend {
      topics: vec![Topic { name: "sorting".into(), description: None }],
      ..Default::default()
    };
    build_router(Arc::new(AppState::with_backend(ServiceConfig::default(), Arc::new(backend))))
  }

  fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
      req = req.header(USER_ID_HEADER, user);
    }
    match body {
      Some(b) => req
        .header("content-type", "application/json")
        .body(Body::from(b.to_string()))
        .unwrap(),
      None => req.body(Body::empty()).unwrap(),
    }
  }

  async fn json_body(res: Response) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  async fn create(app: &axum::Router, user: &str) -> String {
    let res = app.clone().oneshot(request("POST", "/api/v1/sessions", Some(user), None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    json_body(res).await["id"].as_str().unwrap().to_string()
  }

  #[tokio::test]
  async fn health_is_ok() {
    let res = app().oneshot(request("GET", "/api/v1/health", None, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await, json!({"ok": true}));
  }

  #[tokio::test]
  async fn catalog_lists_topics() {
    let res = app().oneshot(request("GET", "/api/v1/catalog", None, None)).await.unwrap();
    assert_eq!(json_body(res).await["topics"][0]["name"], "sorting");
  }

  #[tokio::test]
  async fn session_lifecycle() {
    let app = app();
    let id = create(&app, "u-1").await;

    let uri = format!("/api/v1/sessions/{id}/commands");
    let res = app
      .clone()
      .oneshot(request("POST", &uri, Some("u-1"), Some(json!({"type": "add_sub_question"}))))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["session"]["question"]["sub_questions"][0]["marks"], 1);

    let uri = format!("/api/v1/sessions/{id}");
    let res = app.clone().oneshot(request("GET", &uri, Some("u-2"), None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app.clone().oneshot(request("DELETE", &uri, Some("u-1"), None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = app.oneshot(request("GET", &uri, Some("u-1"), None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn missing_identity_is_unauthorized() {
    let res = app().oneshot(request("POST", "/api/v1/sessions", None, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(res).await["code"], "missing_identity");
  }

  #[tokio::test]
  async fn validation_errors_map_to_422() {
    let app = app();
    let id = create(&app, "u-1").await;
    let uri = format!("/api/v1/sessions/{id}/commands");
    let add = request("POST", &uri, Some("u-1"), Some(json!({"type": "add_sub_question"})));
    assert_eq!(app.clone().oneshot(add).await.unwrap().status(), StatusCode::OK);

    let generate = request("POST", &uri, Some("u-1"), Some(json!({"type": "generate_question"})));
    let res = app.oneshot(generate).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(res).await["code"], "validation");
  }
}
