use crate::config::Config;
use crate::error::{RecError, RecResult};
use crate::models::*;
use crate::services::cold_start::{ColdStartEstimator, ColdStartParams};
use crate::services::rating_source::RatingSource;
use crate::services::snapshot::{ModelSnapshot, ScoreBounds};
use crate::utils::validation::{validate_num_recommendations, validate_username};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Answers recommendation requests for users outside the training corpus.
///
/// Each request fetches the user's raw ratings, fits them against the shared
/// snapshot, ranks every unrated item and cross-validates the fit.
pub struct RecommendationService {
    snapshot: Arc<ModelSnapshot>,
    source: Arc<dyn RatingSource>,
    config: Arc<Config>,
}

impl RecommendationService {
    pub fn new(snapshot: Arc<ModelSnapshot>, source: Arc<dyn RatingSource>, config: Arc<Config>) -> Self {
        Self {
            snapshot,
            source,
            config,
        }
    }

    pub fn snapshot(&self) -> &Arc<ModelSnapshot> {
        &self.snapshot
    }

    pub async fn recommend_for(&self, username: &str, limit: usize) -> RecResult<RecommendationResponse> {
        let request = RecommendationRequest {
            username: username.to_string(),
            num_recommendations: limit,
        };
        self.get_recommendations(&request).await
    }

    pub async fn get_recommendations(&self, request: &RecommendationRequest) -> RecResult<RecommendationResponse> {
        validate_username(&request.username)?;
        validate_num_recommendations(
            request.num_recommendations,
            self.config.recommendation.max_recommendations,
        )?;

        let ratings = self.source.fetch_ratings(&request.username).await?;

        let snapshot = self.snapshot.clone();
        let config = self.config.clone();
        let request = request.clone();

        // fitting is CPU bound; keep it off the async workers
        let response = tokio::task::spawn_blocking(move || recommend(&snapshot, &config, &request, &ratings))
            .await
            .map_err(|e| RecError::Internal(format!("recommendation task failed: {}", e)))??;

        info!(
            "Generated {} recommendations for {} from {} known ratings",
            response.recommendations.len(),
            response.username,
            response.known_items
        );
        Ok(response)
    }
}

fn recommend(
    snapshot: &ModelSnapshot,
    config: &Config,
    request: &RecommendationRequest,
    ratings: &UserRatings,
) -> RecResult<RecommendationResponse> {
    let params = ColdStartParams::from(&config.cold_start);
    let seed = config.cold_start.seed;
    let bounds = ScoreBounds::new(config.recommendation.min_score, config.recommendation.max_score)?;

    let mut estimator = ColdStartEstimator::new(snapshot, ratings.iter(), seed)?;
    estimator.fit(&params)?;

    let rated: Vec<&str> = ratings.items().collect();
    let mut recommendations = snapshot.recommend_within(estimator.bias(), estimator.factors(), &rated, bounds)?;
    recommendations.truncate(request.num_recommendations);

    let cross_validation = match snapshot.cross_validate(ratings.iter(), config.recommendation.cv_folds, &params, seed) {
        Ok(report) => Some(CrossValidationSummary {
            folds: report.folds,
            rmse: report.overall.rmse,
            mae: report.overall.mae,
        }),
        Err(RecError::EmptyDataset(reason)) => {
            warn!("Skipping cross-validation for {}: {}", request.username, reason);
            None
        }
        Err(e) => return Err(e),
    };

    Ok(RecommendationResponse {
        username: request.username.clone(),
        rated_items: ratings.len(),
        known_items: estimator.observations().len(),
        recommendations,
        cross_validation,
        generated_at: Utc::now(),
    })
}
