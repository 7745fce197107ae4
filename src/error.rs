//! Error hierarchy — one kind per layer, one mapping to HTTP status + JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::providers::RewriteError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing Authorization header")]
    AuthMissing,
    #[error("Authorization header must use the Bearer scheme")]
    AuthBadScheme,
    #[error("unknown virtual key")]
    UnknownKey,
    #[error("failed to read request body: {0}")]
    BodyRead(String),
    #[error("no model alias in request body or path")]
    NoAlias,
    #[error("Virtual key not authorized for model: {0}")]
    NotAuthorized(String),
    #[error("{0}")]
    DanglingRef(String),
    #[error("TPS limit exceeded")]
    TpsExceeded,
    #[error("token limit exceeded")]
    TokensExceeded,
    #[error("failed to build upstream request: {0}")]
    UpstreamBuild(String),
    #[error("failed to reach upstream: {0}")]
    UpstreamDial(String),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => PipelineError::UnknownKey,
            StoreError::Storage(msg) => PipelineError::DanglingRef(msg),
        }
    }
}

impl From<RewriteError> for PipelineError {
    fn from(e: RewriteError) -> Self {
        match e {
            RewriteError::NoAlias => PipelineError::NoAlias,
            RewriteError::UrlBuild(msg) => PipelineError::UpstreamBuild(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        use PipelineError::*;
        let status = match &self {
            AuthMissing | AuthBadScheme | UnknownKey => StatusCode::UNAUTHORIZED,
            BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NoAlias => StatusCode::BAD_REQUEST,
            NotAuthorized(_) => StatusCode::FORBIDDEN,
            DanglingRef(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TpsExceeded | TokensExceeded => StatusCode::TOO_MANY_REQUESTS,
            UpstreamBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UpstreamDial(_) => StatusCode::BAD_GATEWAY,
        };

        let details = match &self {
            BodyRead(d) | DanglingRef(d) | UpstreamBuild(d) | UpstreamDial(d) => Some(d.clone()),
            _ => None,
        };

        let body = ErrorBody {
            error: self.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}
