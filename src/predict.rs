//! The prediction pipeline: acquire the model, resolve labels, preprocess the
//! image, run the model and reduce its output to one class.

use std::{sync::Arc, time::Instant};

use ndarray::ArrayD;
use serde::Serialize;
use tracing::info;

use crate::{
    error::AppError,
    fetch::{cache_name, Artifact},
    labels::{label_for, resolve_labels},
    preprocess::{preprocess, target_size},
    state::AppState,
};

/// Where the model for a prediction comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A model previously uploaded to the store, by file name.
    Stored(String),
    /// A model downloaded (or served from the cache) by URL.
    Remote(String),
}

#[derive(Debug)]
pub struct PredictRequest {
    pub source: ModelSource,
    pub labels_url: Option<String>,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    pub confidence: f32,
}

pub async fn predict(state: &AppState, request: PredictRequest) -> Result<Prediction, AppError> {
    let started = Instant::now();

    let (model_name, artifact) = match &request.source {
        ModelSource::Stored(name) => {
            let path = state.store.resolve(name)?;
            (name.clone(), Artifact::Persistent(path))
        }
        ModelSource::Remote(url) => {
            let name = cache_name(url)?;
            (name, state.fetcher.fetch(url).await?)
        }
    };

    let labels = resolve_labels(&state.fetcher, request.labels_url.as_deref()).await?;

    let runtime = Arc::clone(&state.runtime);
    let image = request.image;
    let (class_index, confidence) = tokio::task::spawn_blocking(move || {
        let model = runtime.load(artifact.path())?;
        let (height, width) = target_size(model.input_shape().as_deref());
        let input = preprocess(&image, height, width)?;
        let output = model.run(&input)?;
        // The artifact lives until here so a temporary download is removed
        // only after the forward pass.
        drop(artifact);
        reduce_output(&output)
    })
    .await
    .map_err(|e| AppError::Inference(format!("inference task failed: {}", e)))??;

    let label = label_for(
        class_index,
        labels.as_ref(),
        &model_name,
        !state.config.no_binary_labels,
    );
    let confidence = if state.config.confidence_percent {
        confidence * 100.0
    } else {
        confidence
    };

    info!(
        "Predicted {} ({}) with confidence {:.4} using {} in {:?}",
        label,
        class_index,
        confidence,
        model_name,
        started.elapsed()
    );

    Ok(Prediction {
        label,
        class_index,
        confidence,
    })
}

/// Squeezes away unit axes and picks the winning class. A single value is
/// class 0 with that value as confidence; otherwise the first maximum wins.
pub fn reduce_output(output: &ArrayD<f32>) -> Result<(usize, f32), AppError> {
    let is_scalar = output.shape().iter().all(|&d| d == 1);
    if is_scalar {
        let value = output
            .iter()
            .next()
            .copied()
            .ok_or_else(|| AppError::Inference("model produced an empty output".into()))?;
        return Ok((0, value));
    }

    output
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, top)) if !(v > top) => best,
            _ => Some((i, v)),
        })
        .ok_or_else(|| AppError::Inference("model produced an empty output".into()))
}
