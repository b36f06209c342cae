use std::{fs, sync::Arc};

use anyhow::Context;

use crate::{config::Config, fetch::RemoteFetcher, model::ModelRuntime, store::ModelStore};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub store: ModelStore,
    pub fetcher: RemoteFetcher,
    pub runtime: Arc<dyn ModelRuntime>,
}

impl AppState {
    /// Builds the shared state and makes sure both storage directories exist.
    pub fn new(config: Config, runtime: Arc<dyn ModelRuntime>) -> anyhow::Result<Self> {
        fs::create_dir_all(&config.model_dir)
            .with_context(|| format!("cannot create model dir {:?}", config.model_dir))?;
        fs::create_dir_all(&config.cache_dir)
            .with_context(|| format!("cannot create cache dir {:?}", config.cache_dir))?;

        let store = ModelStore::new(&config.model_dir, &config.model_extension);
        let fetcher = RemoteFetcher::new(&config)?;

        Ok(AppState {
            config,
            store,
            fetcher,
            runtime,
        })
    }
}
