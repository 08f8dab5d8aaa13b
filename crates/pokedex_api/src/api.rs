//! Use-case API behind the `/api/pokemons` routes.
//!
//! # Responsibility
//! - Decode the `record` form field (a JSON-encoded object) for writes.
//! - Run repository calls against the configured store backend.
//! - Translate repository outcomes into status/header/body envelopes.
//!
//! # Invariants
//! - Handlers never panic; every failure becomes a response.
//! - The store handle is opened once per context and shared by its clones.
//! - Store failures answer 500 with a generic message; details go to the log.
//! - `get`/`delete` do not validate ids: an unparsable id is simply absent.

use log::{error, info, warn};
use pokedex_core::{
    Fields, KvRecordRepository, KvResult, KvStore, MemoryKvStore, Record, RecordId,
    RecordRepository, RepoError, RepoResult, RepositoryOptions, SharedSqliteKvStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Route of the collection; single records live at `{API_BASE_PATH}/{id}`.
pub const API_BASE_PATH: &str = "/api/pokemons";
/// Form field carrying the JSON-encoded record on create/update.
pub const RECORD_FORM_FIELD: &str = "record";

const STATUS_OK: u16 = 200;
const STATUS_CREATED: u16 = 201;
const STATUS_NO_CONTENT: u16 = 204;
const STATUS_BAD_REQUEST: u16 = 400;
const STATUS_NOT_FOUND: u16 = 404;
const STATUS_INTERNAL_ERROR: u16 = 500;

/// Store handle plus repository options shared by all handlers.
///
/// The handle is opened once and lives as long as any clone of the context.
#[derive(Clone)]
pub struct ApiContext {
    store: Arc<dyn KvStore + Send + Sync>,
    options: RepositoryOptions,
}

impl ApiContext {
    /// Opens the SQLite file at `path` once for the lifetime of the context.
    ///
    /// # Errors
    /// Returns the store error when the database cannot be opened or migrated.
    pub fn open_sqlite(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        let store = SharedSqliteKvStore::open(path)?;
        info!(
            "event=store_open module=api status=ok backend=sqlite path={}",
            path.display()
        );
        Ok(Self::new(Arc::new(store)))
    }

    /// Process-local store; contents vanish with the last clone.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub fn new(store: Arc<dyn KvStore + Send + Sync>) -> Self {
        Self {
            store,
            options: RepositoryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RepositoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn KvStore + Send + Sync> {
        &self.store
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    fn with_repository<T>(
        &self,
        f: impl FnOnce(&dyn RecordRepository) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let repo = KvRecordRepository::with_options(Arc::clone(&self.store), self.options);
        f(&repo)
    }
}

/// Response envelope: status, optional `Location` header, optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Option<Value>,
}

impl ApiResponse {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            location: None,
            body: Some(body),
        }
    }

    fn no_content() -> Self {
        Self {
            status: STATUS_NO_CONTENT,
            location: None,
            body: None,
        }
    }

    fn message(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "message": message.into() }))
    }

    fn not_found(raw_id: impl std::fmt::Display) -> Self {
        Self::message(
            STATUS_NOT_FOUND,
            format!("No pokemon with ID {raw_id} was found."),
        )
    }
}

/// `POST /api/pokemons`
///
/// Answers 201 with `{"record": ...}` and `Location: /api/pokemons/{id}`.
pub fn create_record(ctx: &ApiContext, form: &HashMap<String, String>) -> ApiResponse {
    let started_at = Instant::now();
    let response = match decode_record_field(form) {
        Ok(fields) => match ctx.with_repository(|repo| repo.create(fields)) {
            Ok(created) => ApiResponse {
                status: STATUS_CREATED,
                location: Some(format!("{API_BASE_PATH}/{}", created.id)),
                body: Some(json!({ "record": created.record })),
            },
            Err(failure) => failure_response("create", failure, None),
        },
        Err(response) => response,
    };
    log_outcome("create", started_at, &response);
    response
}

/// `GET /api/pokemons/{id}`
pub fn get_record(ctx: &ApiContext, raw_id: &str) -> ApiResponse {
    let started_at = Instant::now();
    let response = match RecordId::parse(raw_id) {
        Ok(id) => match ctx.with_repository(|repo| repo.get(id)) {
            Ok(record) => ApiResponse::json(STATUS_OK, record_value(record)),
            Err(failure) => failure_response("get", failure, Some(raw_id)),
        },
        Err(_) => ApiResponse::not_found(raw_id.trim()),
    };
    log_outcome("get", started_at, &response);
    response
}

/// `GET /api/pokemons`
pub fn list_records(ctx: &ApiContext) -> ApiResponse {
    let started_at = Instant::now();
    let response = match ctx.with_repository(|repo| repo.list()) {
        Ok(records) => ApiResponse::json(
            STATUS_OK,
            Value::Array(records.into_iter().map(record_value).collect()),
        ),
        Err(failure) => failure_response("list", failure, None),
    };
    log_outcome("list", started_at, &response);
    response
}

/// `PUT /api/pokemons/{id}`
///
/// The id is validated before the body is decoded.
pub fn update_record(
    ctx: &ApiContext,
    raw_id: &str,
    form: &HashMap<String, String>,
) -> ApiResponse {
    let started_at = Instant::now();
    let response = if RecordId::parse(raw_id).is_err() {
        invalid_update_id()
    } else {
        match decode_record_field(form) {
            Ok(fields) => match ctx.with_repository(|repo| repo.update(raw_id, fields)) {
                Ok(_) => ApiResponse::no_content(),
                Err(failure) => failure_response("update", failure, Some(raw_id)),
            },
            Err(response) => response,
        }
    };
    log_outcome("update", started_at, &response);
    response
}

/// `DELETE /api/pokemons/{id}`
pub fn delete_record(ctx: &ApiContext, raw_id: &str) -> ApiResponse {
    let started_at = Instant::now();
    let response = match RecordId::parse(raw_id) {
        Ok(id) => match ctx.with_repository(|repo| repo.delete(id)) {
            Ok(()) => ApiResponse::no_content(),
            Err(failure) => failure_response("delete", failure, Some(raw_id)),
        },
        Err(_) => ApiResponse::not_found(raw_id.trim()),
    };
    log_outcome("delete", started_at, &response);
    response
}

fn decode_record_field(form: &HashMap<String, String>) -> Result<Fields, ApiResponse> {
    let raw = form.get(RECORD_FORM_FIELD).ok_or_else(|| {
        ApiResponse::message(
            STATUS_BAD_REQUEST,
            format!("Form field `{RECORD_FORM_FIELD}` is required."),
        )
    })?;

    Record::from_json_str(raw)
        .map(Record::into_fields)
        .map_err(|err| {
            ApiResponse::message(
                STATUS_BAD_REQUEST,
                format!("Form field `{RECORD_FORM_FIELD}` must hold a JSON object: {err}"),
            )
        })
}

fn record_value(record: Record) -> Value {
    Value::Object(record.into_fields())
}

fn invalid_update_id() -> ApiResponse {
    ApiResponse::message(
        STATUS_BAD_REQUEST,
        "Specify a valid ID for the pokemon to update.",
    )
}

fn failure_response(op: &str, failure: RepoError, raw_id: Option<&str>) -> ApiResponse {
    match failure {
        RepoError::NotFound(id) => ApiResponse::not_found(id),
        RepoError::EmptyCollection => ApiResponse::message(
            STATUS_NOT_FOUND,
            "The pokemon collection has no records.",
        ),
        RepoError::InvalidId(_) => invalid_update_id(),
        RepoError::Validation(err) => {
            ApiResponse::message(STATUS_BAD_REQUEST, err.to_string())
        }
        err @ RepoError::Allocation { .. } => {
            warn!(
                "event=api_request module=api op={} status=error error_code=allocation_failed error={}",
                op, err
            );
            internal_error()
        }
        err => {
            error!(
                "event=api_request module=api op={} status=error error_code=repo_failed id={} error={}",
                op,
                raw_id.unwrap_or("-"),
                err
            );
            internal_error()
        }
    }
}

fn internal_error() -> ApiResponse {
    ApiResponse::message(STATUS_INTERNAL_ERROR, "Internal server error.")
}

fn log_outcome(op: &str, started_at: Instant, response: &ApiResponse) {
    info!(
        "event=api_request module=api op={} http_status={} duration_ms={}",
        op,
        response.status,
        started_at.elapsed().as_millis()
    );
}
