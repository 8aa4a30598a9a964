use movierec::*;

fn main() -> anyhow::Result<()> {
    init_tracing();

    println!("movierec basic usage");

    // 1. Build a small rating corpus: two groups of users with opposite taste
    let mut store = RatingStore::new();
    for user in 0..12 {
        let (action, drama) = if user % 2 == 0 { (9.0, 3.0) } else { (3.0, 9.0) };
        let ratings = (0..6).flat_map(|movie| {
            [
                (format!("action{}", movie), action),
                (format!("drama{}", movie), drama),
            ]
        });
        store.extend_user(&format!("user{}", user), ratings)?;
    }
    println!(
        "Corpus: {} users, {} items, {} ratings",
        store.user_count(),
        store.item_count(),
        store.rating_count()
    );

    // 2. Train the factor model
    let params = TrainerParams {
        factors: 4,
        learning_rate: 0.02,
        seed: Some(7),
        ..TrainerParams::default()
    };
    let mut trainer = Trainer::new(store, params)?;
    trainer.sample_test_set(0.1)?;
    trainer.initialize(0.0, 0.1)?;
    let report = trainer.train(150, false)?;
    println!("Trained {} epochs over {} ratings", report.epochs, report.observations);

    let baseline = trainer.baseline_metrics()?;
    let model = trainer.validate()?;
    println!("Test rmse {:.3} (global mean baseline {:.3})", model.rmse, baseline.rmse);

    // 3. Freeze the item side
    let snapshot = trainer.snapshot()?;
    println!("Snapshot: {} items x {} factors", snapshot.item_count(), snapshot.factors());

    // 4. Score a newcomer who only rated a few movies
    let newcomer = vec![("action0", 10.0), ("action1", 8.0), ("drama0", 2.0), ("drama1", 3.0), ("action2", 9.0)];
    let mut estimator = ColdStartEstimator::new(&snapshot, newcomer.clone(), Some(7))?;
    estimator.fit(&ColdStartParams::default())?;

    println!("Top picks for the newcomer:");
    for item in estimator.recommendations(5)? {
        println!("  {:<10} {:.2}", item.item_id, item.score);
    }

    // 5. Estimate how well the newcomer's ratings are predicted
    let cv = snapshot.cross_validate(newcomer, 5, &ColdStartParams::default(), Some(7))?;
    println!("{}-fold cross-validation rmse {:.3}", cv.folds, cv.overall.rmse);

    Ok(())
}
