// HTTP surface
//
// Routes:
//   GET       /                      redirect (303) to the current step
//   GET       /capabilities          host probe report
//   POST      /upload                multipart bundle upload
//   POST      /database-config/test  connection test, no state change
//   GET|POST  /:step                 step view / form submission
//
// Anti-forgery tokens are bound to the `installer_session` cookie, which is set on first contact.

pub mod steps;
pub mod upload;

#[cfg(test)]
mod test_support;

use crate::error::InstallError;
use crate::installation::capabilities::CapabilityReport;
use crate::models::responses::{ApiResponse, StepView};
use crate::models::state::Step;
use crate::wizard::runtime::Installer;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "installer_session";

#[derive(Clone)]
pub struct AppContext {
    pub installer: Arc<Installer>,
}

pub fn router(ctx: AppContext) -> Router {
    let body_limit =
        usize::try_from(ctx.installer.settings().server.max_request_bytes).unwrap_or(usize::MAX);
    Router::new()
        .route("/", get(steps::index))
        .route("/capabilities", get(capabilities))
        .route("/upload", post(upload::upload_bundle))
        .route("/database-config/test", post(steps::test_database))
        .route("/:step", get(steps::show).post(steps::submit))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx)
}

async fn capabilities(State(ctx): State<AppContext>) -> Json<ApiResponse<CapabilityReport>> {
    Json(ApiResponse::ok(ctx.installer.capabilities().await))
}

// =========================
// Session cookie
// =========================

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    fresh: bool,
}

impl Session {
    /// Reuse the caller's session, or start a new one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match session_from_cookies(headers) {
            Some(id) => Self { id, fresh: false },
            None => Self {
                id: uuid::Uuid::new_v4().to_string(),
                fresh: true,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set the cookie on responses to requests that arrived without one.
    pub fn attach(&self, mut response: Response) -> Response {
        if self.fresh {
            let cookie = format!(
                "{}={}; Path=/; HttpOnly; SameSite=Strict",
                SESSION_COOKIE, self.id
            );
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

/// Session id from the `Cookie` header. Anything that is not a UUID is ignored.
pub fn session_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| uuid::Uuid::parse_str(value).is_ok())
}

// =========================
// Responses
// =========================

pub fn status_for(err: &InstallError) -> StatusCode {
    match err {
        InstallError::Validation(_) | InstallError::Archive { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        InstallError::Capability { .. } => StatusCode::PRECONDITION_FAILED,
        InstallError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        InstallError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        InstallError::Forgery => StatusCode::FORBIDDEN,
        InstallError::AlreadyComplete
        | InstallError::AlreadyExtracted
        | InstallError::StepMismatch { .. } => StatusCode::CONFLICT,
        InstallError::Upload(_) => StatusCode::BAD_REQUEST,
        InstallError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

/// JSON error envelope. The step view is included when the step is shown again.
pub fn error_response(err: &InstallError, view: Option<StepView>) -> Response {
    let message = match err {
        InstallError::Persistence(details) => {
            error!("[PHASE: http] [STEP: response] Installer state unavailable (details={})", details);
            "Installer state is unavailable. Check the installer log.".to_string()
        }
        InstallError::Capability {
            message,
            manual_action,
        } => format!("{} {}", message, manual_action),
        other => other.to_string(),
    };
    let body = match view {
        Some(view) => ApiResponse::fail_with(view, message),
        None => ApiResponse::fail(message),
    };
    (status_for(err), Json(body)).into_response()
}

pub fn redirect_to(step: Step) -> Response {
    Redirect::to(&format!("/{}", step.slug())).into_response()
}
