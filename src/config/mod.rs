use serde::{Deserialize, Serialize};
use std::net::{AddrParseError, SocketAddr};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub training: TrainingConfig,
    pub cold_start: ColdStartConfig,
    pub recommendation: RecommendationConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Hyperparameters of the full matrix-factorization training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub factors: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub epochs: usize,
    pub init_mean: f64,
    pub init_std_dev: f64,
    pub shuffle: bool,
    /// Items with fewer votes are dropped before training.
    pub min_votes: usize,
    pub test_fraction: f64,
    pub holdout_fraction: f64,
    pub cold_start_test_fraction: f64,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartConfig {
    pub epochs: usize,
    pub init_mean: f64,
    pub init_std_dev: f64,
    pub shuffle: bool,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    pub default_recommendations: usize,
    pub max_recommendations: usize,
    pub min_score: f64,
    pub max_score: f64,
    pub cv_folds: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub corpus_path: String,
    pub snapshot_path: String,
    /// One `<username>.json` ratings file per user.
    pub ratings_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            factors: 150,
            learning_rate: 0.001,
            regularization: 0.02,
            epochs: 20,
            init_mean: 0.0,
            init_std_dev: 0.01,
            shuffle: false,
            min_votes: 50,
            test_fraction: 0.1,
            holdout_fraction: 0.0,
            cold_start_test_fraction: 0.1,
            seed: None,
        }
    }
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            init_mean: 0.0,
            init_std_dev: 0.1,
            shuffle: false,
            seed: None,
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            default_recommendations: 1000,
            max_recommendations: 1000,
            min_score: 1.0,
            max_score: 10.0,
            cv_folds: 5,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            corpus_path: "data/ratings.json".to_string(),
            snapshot_path: "data/model.json".to_string(),
            ratings_dir: "data/users".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            training: TrainingConfig::default(),
            cold_start: ColdStartConfig::default(),
            recommendation: RecommendationConfig::default(),
            data: DataConfig::default(),
        }
    }
}

impl Config {
    /// Layers `path` and then `MOVIEREC_*` environment variables (nested keys
    /// separated by `__`) over the defaults.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("MOVIEREC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
