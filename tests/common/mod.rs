#![allow(dead_code)]

use std::{io::Cursor, path::Path, sync::Arc};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use model_runner::{
    model::{LoadedModel, ModelRuntime},
    AppError, AppState, Config,
};
use ndarray::{Array4, ArrayD, IxDyn};
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceExt;

/// Test models are JSON files: the declared input shape and the fixed output
/// the model returns for any input.
#[derive(Deserialize)]
struct StubModel {
    input: Option<Vec<Option<i64>>>,
    output: Vec<f32>,
}

pub struct StubRuntime;

impl ModelRuntime for StubRuntime {
    fn load(&self, path: &Path) -> Result<Box<dyn LoadedModel>, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| AppError::ModelLoad(e.to_string()))?;
        let model: StubModel =
            serde_json::from_str(&text).map_err(|e| AppError::ModelLoad(e.to_string()))?;
        Ok(Box::new(model))
    }
}

impl LoadedModel for StubModel {
    fn input_shape(&self) -> Option<Vec<Option<i64>>> {
        self.input.clone()
    }

    fn run(&self, input: &Array4<f32>) -> Result<ArrayD<f32>, AppError> {
        if let Some(dims) = &self.input {
            for (axis, declared) in dims.iter().enumerate() {
                if let Some(d) = declared.filter(|&d| d > 0) {
                    if input.shape()[axis] != d as usize {
                        return Err(AppError::Inference(format!(
                            "axis {} expected {} got {}",
                            axis,
                            d,
                            input.shape()[axis]
                        )));
                    }
                }
            }
        }
        if input.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(AppError::Inference("input outside [0, 1]".into()));
        }
        ArrayD::from_shape_vec(IxDyn(&[1, self.output.len()]), self.output.clone())
            .map_err(|e| AppError::Inference(e.to_string()))
    }
}

pub fn stub_model(input: &str, output: &[f32]) -> String {
    format!(r#"{{"input": {}, "output": {:?}}}"#, input, output)
}

pub fn test_app(root: &Path) -> Router {
    test_app_with(Config::with_root(root))
}

pub fn test_app_with(config: Config) -> Router {
    let state = AppState::new(config, Arc::new(StubRuntime)).unwrap();
    model_runner::app(Arc::new(state))
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageOutputFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

const BOUNDARY: &str = "model-runner-test-boundary";

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn upload(app: &Router, file_name: &str, bytes: &[u8]) -> (StatusCode, Value) {
    send(
        app,
        multipart_request("/upload_model", &[Part::File("file", file_name, bytes)]),
    )
    .await
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub fn spawn_upstream(router: Router) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(router.into_make_service())
            .await
            .unwrap();
    });
    format!("http://{}", addr)
}
