use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use movierec::services::rating_source::InMemoryRatingSource;
use movierec::services::serving::create_router;
use movierec::*;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Two taste clusters: users 0-9 love the "a" movies, users 10-19 love "b".
fn corpus() -> RatingStore {
    let mut store = RatingStore::new();
    for user in 0..20 {
        let likes_a = user < 10;
        let ratings: Vec<(String, f64)> = (0..8)
            .filter(|movie| (user + movie) % 3 != 0)
            .flat_map(|movie| {
                let (a, b) = if likes_a { (9.0, 3.0) } else { (3.0, 9.0) };
                vec![(format!("a{}", movie), a), (format!("b{}", movie), b)]
            })
            .collect();
        store.extend_user(&format!("user{}", user), ratings).unwrap();
    }
    store
}

fn trained_snapshot() -> ModelSnapshot {
    let params = TrainerParams {
        factors: 4,
        learning_rate: 0.02,
        regularization: 0.02,
        seed: Some(42),
    };
    let mut trainer = Trainer::new(corpus(), params).unwrap();
    trainer.sample_test_set(0.1).unwrap();
    trainer.initialize(0.0, 0.1).unwrap();

    let baseline = trainer.baseline_metrics().unwrap();
    trainer.train(200, false).unwrap();
    let model = trainer.validate().unwrap();
    assert!(model.rmse < baseline.rmse, "{} !< {}", model.rmse, baseline.rmse);

    trainer.snapshot().unwrap()
}

#[test]
fn test_training_recovers_planted_factors() {
    use movierec::algorithms::initializer::{normal, normal_matrix, rng_from_seed};

    let mut rng = rng_from_seed(Some(2024));
    let users = normal_matrix(&mut rng, 40, 2, 0.0, 1.0);
    let items = normal_matrix(&mut rng, 30, 2, 0.0, 1.0);

    let mut store = RatingStore::new();
    for u in 0..40 {
        for m in 0..30 {
            if (u * 31 + m * 17) % 4 == 0 {
                continue;
            }
            let value = 6.0 + users.row(u).dot(&items.row(m)) + normal(&mut rng, 0.0, 0.1);
            store.add_rating(&format!("u{}", u), &format!("m{}", m), value).unwrap();
        }
    }

    let params = TrainerParams {
        factors: 2,
        learning_rate: 0.01,
        regularization: 0.02,
        seed: Some(5),
    };
    let mut trainer = Trainer::new(store, params).unwrap();
    trainer.sample_test_set(0.1).unwrap();
    trainer.initialize(0.0, 0.1).unwrap();
    trainer.train(150, false).unwrap();

    let baseline = trainer.baseline_metrics().unwrap();
    let model = trainer.validate().unwrap();
    assert!(model.rmse < baseline.rmse, "{} !< {}", model.rmse, baseline.rmse);
}

#[test]
fn test_store_filter_then_train() {
    let mut store = corpus();
    store.add_rating("user0", "obscure", 10.0).unwrap();
    let items_before = store.item_count();

    let removed = store.filter_in_place(VoteBounds::at_least(2));
    assert_eq!(removed, 1);
    assert_eq!(store.item_count(), items_before - 1);
    assert!(store.item_id("obscure").is_err());

    let mut trainer = Trainer::new(store, TrainerParams { factors: 2, seed: Some(1), ..TrainerParams::default() }).unwrap();
    let report = trainer.train(1, false).unwrap();
    assert_eq!(report.observations, trainer.store().rating_count());
}

#[test]
fn test_cold_start_user_gets_their_cluster() {
    let snapshot = trained_snapshot();
    let newcomer = vec![("a0", 10.0), ("a1", 9.0), ("b0", 2.0), ("b1", 3.0), ("a2", 9.0), ("b2", 2.0)];

    let mut estimator = ColdStartEstimator::new(&snapshot, newcomer.clone(), Some(7)).unwrap();
    estimator.fit(&ColdStartParams::default()).unwrap();

    let recs = estimator.recommendations(4).unwrap();
    assert_eq!(recs.len(), 4);
    assert!(recs.iter().all(|r| r.item_id.starts_with('a')), "{:?}", recs);
    assert!(recs.iter().all(|r| !newcomer.iter().any(|(item, _)| *item == r.item_id)));

    let report = snapshot
        .cross_validate(newcomer, 3, &ColdStartParams::default(), Some(7))
        .unwrap();
    assert_eq!(report.folds, 3);
    assert_eq!(report.overall.count, 6);
}

#[test]
fn test_snapshot_file_round_trip() {
    let snapshot = trained_snapshot();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");

    snapshot.save(&path).unwrap();
    let restored = ModelSnapshot::load_with_factors(&path, 4).unwrap();
    assert_eq!(restored, snapshot);

    let bias = 0.3;
    let user = ndarray::Array1::from(vec![0.1, -0.2, 0.05, 0.4]);
    assert_eq!(
        restored.recommend(bias, user.view(), &["a0"]).unwrap(),
        snapshot.recommend(bias, user.view(), &["a0"]).unwrap()
    );
}

fn app() -> axum::Router {
    let source: InMemoryRatingSource = vec![(
        "newcomer",
        vec![("a0", 10.0), ("a3", 9.0), ("b5", 2.0), ("b6", 1.0), ("a6", 9.0)]
            .into_iter()
            .collect::<UserRatings>(),
    )]
    .into_iter()
    .collect();

    let mut config = Config::default();
    config.cold_start.seed = Some(3);
    config.cold_start.epochs = 100;

    create_router(AppState::from_parts(config, trained_snapshot(), Arc::new(source)))
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_http_recommendations() {
    let (status, body) = get_json(app(), "/recommendations/newcomer?limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let data = &body["data"];
    assert_eq!(data["username"], "newcomer");
    assert_eq!(data["known_items"], 5);
    assert_eq!(data["recommendations"].as_array().unwrap().len(), 3);
    assert_eq!(data["cross_validation"]["folds"], 5);
}

#[tokio::test]
async fn test_http_errors() {
    let (status, body) = get_json(app(), "/recommendations/stranger").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = get_json(app(), "/recommendations/newcomer?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(app(), "/items/nonexistent/similar").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http_model_and_similar_items() {
    let (status, body) = get_json(app(), "/model").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"], 16);
    assert_eq!(body["data"]["factors"], 4);

    let (status, body) = get_json(app(), "/items/a0/similar?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = get_json(app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
}
