use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    error::AppError,
    predict::{predict, ModelSource, PredictRequest, Prediction},
    state::SharedState,
};

#[derive(Serialize)]
pub struct ModelEntry {
    pub name: String,
}

#[derive(Serialize)]
pub struct ModelList {
    pub models: Vec<ModelEntry>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub model_name: String,
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Model runner backend (multi-model) active." }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK", "version": env!("CARGO_PKG_VERSION") }))
}

/// GET /models
pub async fn list_models(State(state): State<SharedState>) -> Result<Json<ModelList>, AppError> {
    let store = state.store.clone();
    let names = tokio::task::spawn_blocking(move || store.list())
        .await
        .map_err(|e| AppError::Storage(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    Ok(Json(ModelList {
        models: names.into_iter().map(|name| ModelEntry { name }).collect(),
    }))
}

/// POST /upload_model with the model in the multipart field `file`.
pub async fn upload_model(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = next_field(&mut multipart).await? {
        if field.name() == Some("file") {
            let file_name = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| AppError::client("Uploaded file has no file name"))?;
            upload = Some((file_name, read_bytes(field).await?));
            break;
        }
    }
    let (file_name, bytes) = upload.ok_or_else(|| AppError::client("No file uploaded"))?;

    let store = state.store.clone();
    let model_name = tokio::task::spawn_blocking(move || store.save(&file_name, &bytes))
        .await
        .map_err(|e| AppError::Storage(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    Ok(Json(UploadResponse {
        status: "uploaded",
        model_name,
    }))
}

/// POST /predict with an `image` file and either `model_name` or `model_url`,
/// plus an optional `labels_url`.
pub async fn predict_handler(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, AppError> {
    let mut model_name = None;
    let mut model_url = None;
    let mut labels_url = None;
    let mut image = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("model_name") => model_name = non_empty(read_text(field).await?),
            Some("model_url") => model_url = non_empty(read_text(field).await?),
            Some("labels_url") => labels_url = non_empty(read_text(field).await?),
            Some("image") => image = Some(read_bytes(field).await?),
            _ => {}
        }
    }

    let source = match (model_name, model_url) {
        (Some(name), None) => ModelSource::Stored(name),
        (None, Some(url)) => ModelSource::Remote(url),
        (Some(_), Some(_)) => {
            return Err(AppError::client(
                "Provide either model_name or model_url, not both",
            ))
        }
        (None, None) => return Err(AppError::client("model_name or model_url is required")),
    };
    let image = image.ok_or_else(|| AppError::client("No image uploaded"))?;

    let prediction = predict(
        &state,
        PredictRequest {
            source,
            labels_url,
            image,
        },
    )
    .await?;
    Ok(Json(prediction))
}

async fn next_field<'a>(multipart: &'a mut Multipart) -> Result<Option<Field<'a>>, AppError> {
    multipart
        .next_field()
        .await
        .map_err(|e| AppError::client(format!("Malformed multipart body: {}", e)))
}

async fn read_bytes(field: Field<'_>) -> Result<Vec<u8>, AppError> {
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::client(format!("Failed to read upload: {}", e)))?;
    Ok(bytes.to_vec())
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::client(format!("Failed to read form field: {}", e)))
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
