use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

/// Service configuration. Every field can be set on the command line or through
/// the matching environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "model_runner")]
#[command(version)]
#[command(about = "HTTP service that runs image-classification models on uploaded images")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "5020")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Maximum request body size in megabytes
    #[arg(long, env = "BODY_LIMIT_MB", default_value = "100")]
    pub body_limit_mb: usize,

    /// Directory holding uploaded, server-resident models
    #[arg(long, env = "MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Directory holding models and label files fetched from URLs
    #[arg(long, env = "CACHE_DIR", default_value = "model_cache")]
    pub cache_dir: PathBuf,

    /// File extension accepted for model files (without the dot)
    #[arg(long, env = "MODEL_EXTENSION", default_value = "pb")]
    pub model_extension: String,

    /// Timeout for outbound model and label downloads, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "60")]
    pub fetch_timeout_secs: u64,

    /// Name of the graph operation fed with the image tensor
    #[arg(long, env = "INPUT_OP", default_value = "x")]
    pub input_op: String,

    /// Name of the graph operation fetched as the prediction
    #[arg(long, env = "OUTPUT_OP", default_value = "Identity")]
    pub output_op: String,

    /// Bearer token sent with outbound downloads
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Delete downloaded models after each request instead of caching them
    #[arg(long, env = "NO_CACHE")]
    pub no_cache: bool,

    /// Report confidence as a percentage instead of a [0,1] score
    #[arg(long, env = "CONFIDENCE_PERCENT")]
    pub confidence_percent: bool,

    /// Disable the Cat/Dog label fallback for models named after both
    #[arg(long, env = "NO_BINARY_LABELS")]
    pub no_binary_labels: bool,
}

impl Config {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Configuration with every default applied and the two storage
    /// directories placed under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut config = Config::parse_from(["model_runner"]);
        config.model_dir = root.join("models");
        config.cache_dir = root.join("model_cache");
        config
    }
}
