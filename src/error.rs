//! Error kinds produced by the prediction pipeline and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    ClientInput(String),

    #[error("{0}")]
    NotFound(String),

    #[error("failed to fetch {url}: {message}")]
    RemoteFetch { url: String, message: String },

    #[error("error loading model: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl AppError {
    pub fn client(message: impl Into<String>) -> Self {
        AppError::ClientInput(message.into())
    }

    pub fn remote(url: impl Into<String>, message: impl ToString) -> Self {
        AppError::RemoteFetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ClientInput(_) => "client_input",
            AppError::NotFound(_) => "not_found",
            AppError::RemoteFetch { .. } => "remote_fetch",
            AppError::ModelLoad(_) => "model_load",
            AppError::Inference(_) => "inference",
            AppError::Storage(_) => "storage",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ClientInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RemoteFetch { .. } => StatusCode::BAD_GATEWAY,
            AppError::ModelLoad(_) | AppError::Inference(_) | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".into());
        AppError::remote(url, err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        } else {
            tracing::warn!(kind = self.kind(), "{}", self);
        }
        let body = Json(json!({ "error": self.to_string(), "kind": self.kind() }));
        (status, body).into_response()
    }
}
