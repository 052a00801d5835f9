// Step views and submissions
//
// GET renders the current step as JSON; asking for any other step redirects to the current one.
// POST applies a form submission and redirects to whatever step the installer reached. When the
// submission is refused, the step is returned with its error list instead.

use super::{error_response, redirect_to, status_for, AppContext, Session};
use crate::error::InstallError;
use crate::models::requests::StepSubmission;
use crate::models::responses::{ApiResponse, DatabaseTestResponse};
use crate::models::state::Step;
use crate::wizard::runtime::StepReply;
use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::info;

fn unknown_step(slug: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::fail(format!("Unknown step '{}'", slug))),
    )
        .into_response()
}

pub async fn index(State(ctx): State<AppContext>, headers: HeaderMap) -> Response {
    let session = Session::from_headers(&headers);
    let response = match ctx.installer.view(session.id()).await {
        Ok(view) => redirect_to(view.step),
        Err(e) => error_response(&e, None),
    };
    session.attach(response)
}

pub async fn show(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Response {
    let session = Session::from_headers(&headers);
    let Some(step) = Step::from_slug(&slug) else {
        return session.attach(unknown_step(&slug));
    };
    let response = match ctx.installer.view(session.id()).await {
        Ok(view) if view.step == step => Json(ApiResponse::ok(view)).into_response(),
        Ok(view) => redirect_to(view.step),
        Err(e) => error_response(&e, None),
    };
    session.attach(response)
}

pub async fn submit(
    State(ctx): State<AppContext>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Form(submission): Form<StepSubmission>,
) -> Response {
    let session = Session::from_headers(&headers);
    let Some(step) = Step::from_slug(&slug) else {
        return session.attach(unknown_step(&slug));
    };
    let response = match ctx
        .installer
        .submit(
            session.id(),
            &submission.csrf_token,
            step,
            &submission.fields,
        )
        .await
    {
        Ok(StepReply { view, error: None }) => redirect_to(view.step),
        Ok(StepReply {
            view,
            error: Some(e),
        }) => error_response(&e, Some(view)),
        Err(e) => error_response(&e, None),
    };
    session.attach(response)
}

pub async fn test_database(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Form(submission): Form<StepSubmission>,
) -> Response {
    let session = Session::from_headers(&headers);
    let result = ctx
        .installer
        .test_database(session.id(), &submission.csrf_token, &submission.fields)
        .await;
    let response = match result {
        Ok(message) => {
            info!("[PHASE: http] [STEP: database_test] {}", message);
            Json(DatabaseTestResponse {
                success: true,
                message,
            })
            .into_response()
        }
        Err(e @ InstallError::Persistence(_)) => error_response(&e, None),
        Err(e) => (
            status_for(&e),
            Json(DatabaseTestResponse {
                success: false,
                message: e.to_string(),
            }),
        )
            .into_response(),
    };
    session.attach(response)
}
