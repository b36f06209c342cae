//! HTTP service that classifies images with uploaded or remotely hosted models.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod fetch;
pub mod labels;
pub mod model;
pub mod predict;
pub mod preprocess;
pub mod routes;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::AppError;
pub use state::{AppState, SharedState};

pub fn app(state: SharedState) -> Router {
    let body_limit = state.config.body_limit_bytes();

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health_check))
        .route("/models", get(routes::list_models))
        .route("/upload_model", post(routes::upload_model))
        .route("/predict", post(routes::predict_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
