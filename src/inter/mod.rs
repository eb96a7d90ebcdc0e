/*!
Interoperation between clients and the server.

(Not the application and the database; that's covered by `store`.)

This module holds what every handler shares: the caller-facing error
taxonomy and its HTTP mapping, caller-identity resolution, and the JSON
response helpers. The per-entity handlers live in the submodules.
*/
use axum::{
    http::{header::HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::store::DbError;

pub mod lessons;
pub mod users;
pub mod webhook;

/// Header carrying the resolved caller identity, as established by the
/// (out-of-scope) identity-provider session in front of this service.
pub static CALLER_HEADER: &str = "x-ecole-uname";

/// A single field-level validation failure, surfaced next to its field.
#[derive(Clone, Debug, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

/**
Everything a mutation or list read can report to the caller.

Validation and authorization failures carry actionable detail; storage
faults deliberately don't. The full storage error is logged server-side
and the client sees only a generic message.
*/
#[derive(Debug)]
pub enum Fault {
    Unauthorized,
    Validation(Vec<FieldError>),
    NotFound(String),
    Storage(DbError),
    BadSignature(String),
}

impl From<DbError> for Fault {
    fn from(e: DbError) -> Fault { Fault::Storage(e) }
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        match self {
            Fault::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized" })),
            ).into_response(),
            Fault::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "validation_failed",
                    "fields": fields,
                })),
            ).into_response(),
            Fault::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "not_found",
                    "what": what,
                })),
            ).into_response(),
            Fault::Storage(e) => {
                log::error!("Storage fault: {}", e.display());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "failed to fetch" })),
                ).into_response()
            },
            Fault::BadSignature(why) => {
                log::warn!("Webhook signature rejected: {}", &why);
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "signature_verification_failed" })),
                ).into_response()
            },
        }
    }
}

/**
Resolve the caller identity from the request headers.

Every mutation calls this before touching the store; a missing or
unreadable identity is an `Unauthorized` fault with no side effects.
*/
pub fn resolve_caller(headers: &HeaderMap) -> Result<String, Fault> {
    let uname = match headers.get(CALLER_HEADER) {
        Some(value) => match value.to_str() {
            Ok(s) => s,
            Err(e) => {
                log::warn!(
                    "Failed converting {} value {:?} to &str: {}",
                    CALLER_HEADER, value, &e
                );
                return Err(Fault::Unauthorized);
            },
        },
        None => { return Err(Fault::Unauthorized); },
    };

    if uname.is_empty() {
        return Err(Fault::Unauthorized);
    }

    Ok(uname.to_owned())
}

/// 200 with a JSON body.
pub fn json_ok(body: serde_json::Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// 200 with an already-rendered JSON body (a cached list view).
pub fn json_ok_raw(body: String) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    ).into_response()
}
