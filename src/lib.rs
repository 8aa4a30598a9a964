pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{RecError, RecResult};
pub use models::*;
pub use services::cold_start::{ColdStartEstimator, ColdStartParams};
pub use services::rating_store::{RatingStore, VoteBounds};
pub use services::snapshot::ModelSnapshot;
pub use services::training::{Trainer, TrainerParams};

use anyhow::Result;
use services::rating_source::{DirectoryRatingSource, RatingSource};
use services::recommendation::RecommendationService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub snapshot: Arc<ModelSnapshot>,
    pub recommendation_service: Arc<RecommendationService>,
}

impl AppState {
    /// Loads the snapshot named in the config and serves ratings from the
    /// configured ratings directory.
    pub async fn new(config: Config) -> Result<Self> {
        let snapshot = ModelSnapshot::load_with_factors(&config.data.snapshot_path, config.training.factors)?;
        let source = Arc::new(DirectoryRatingSource::new(&config.data.ratings_dir));
        Ok(Self::from_parts(config, snapshot, source))
    }

    pub fn from_parts(config: Config, snapshot: ModelSnapshot, source: Arc<dyn RatingSource>) -> Self {
        let config = Arc::new(config);
        let snapshot = Arc::new(snapshot);

        let recommendation_service = Arc::new(RecommendationService::new(
            snapshot.clone(),
            source,
            config.clone(),
        ));

        Self {
            config,
            snapshot,
            recommendation_service,
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
