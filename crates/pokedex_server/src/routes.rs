//! axum routing for the records API and static assets.
//!
//! Handlers hop onto the blocking pool before touching the store, so SQLite
//! I/O never runs on a request task. Write bodies are read from either
//! `application/x-www-form-urlencoded` or `multipart/form-data`.

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use log::{debug, error};
use pokedex_api::{ApiContext, ApiResponse, API_BASE_PATH};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::services::ServeDir;

type RecordForm = HashMap<String, String>;

#[derive(Clone)]
struct AppState {
    ctx: Arc<ApiContext>,
}

/// Builds the application router.
///
/// Paths outside `/api/pokemons` fall through to files under `public_dir`.
pub fn router(ctx: ApiContext, public_dir: &FsPath) -> Router {
    let state = AppState { ctx: Arc::new(ctx) };

    Router::new()
        .route(API_BASE_PATH, get(list_records).post(create_record))
        .route(
            &format!("{API_BASE_PATH}/:id"),
            get(get_record).put(update_record).delete(delete_record),
        )
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state)
}

async fn create_record(State(state): State<AppState>, request: Request) -> Response {
    let form = read_form(request).await;
    run_blocking(state, move |ctx| pokedex_api::create_record(ctx, &form)).await
}

async fn list_records(State(state): State<AppState>) -> Response {
    run_blocking(state, pokedex_api::list_records).await
}

async fn get_record(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run_blocking(state, move |ctx| pokedex_api::get_record(ctx, &id)).await
}

async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> Response {
    let form = read_form(request).await;
    run_blocking(state, move |ctx| pokedex_api::update_record(ctx, &id, &form)).await
}

async fn delete_record(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    run_blocking(state, move |ctx| pokedex_api::delete_record(ctx, &id)).await
}

/// Decodes the request body into form fields.
///
/// An undecodable body is treated as a form without the `record` field,
/// which the API answers with 400.
async fn read_form(request: Request) -> RecordForm {
    let decoded = if is_multipart(&request) {
        read_multipart(request).await
    } else {
        Form::<RecordForm>::from_request(request, &())
            .await
            .map(|Form(fields)| fields)
            .map_err(|rejection| rejection.body_text())
    };

    match decoded {
        Ok(fields) => fields,
        Err(message) => {
            debug!(
                "event=form_decode module=server status=error error={}",
                message
            );
            RecordForm::new()
        }
    }
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

/// Collects the text parts of a multipart body; file parts are skipped and a
/// repeated name keeps its last value, as urlencoded decoding does.
async fn read_multipart(request: Request) -> Result<RecordForm, String> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| rejection.body_text())?;

    let mut fields = RecordForm::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| err.body_text())?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            continue;
        }
        let value = field.text().await.map_err(|err| err.body_text())?;
        fields.insert(name, value);
    }
    Ok(fields)
}

async fn run_blocking<F>(state: AppState, f: F) -> Response
where
    F: FnOnce(&ApiContext) -> ApiResponse + Send + 'static,
{
    let ctx = Arc::clone(&state.ctx);
    match tokio::task::spawn_blocking(move || f(&ctx)).await {
        Ok(response) => to_http(response),
        Err(err) => {
            error!(
                "event=api_request module=server status=error error_code=blocking_task_failed error={}",
                err
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "Internal server error." })),
            )
                .into_response()
        }
    }
}

fn to_http(response: ApiResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = match response.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    };

    if let Some(location) = response.location {
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                http.headers_mut().insert(header::LOCATION, value);
            }
            Err(err) => error!(
                "event=api_request module=server status=error error_code=bad_location error={}",
                err
            ),
        }
    }

    http
}
