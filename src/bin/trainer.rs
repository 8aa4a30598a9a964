use anyhow::Result;
use clap::{Parser, ValueEnum};
use movierec::services::rating_source::DirectoryRatingSource;
use movierec::{init_tracing, ColdStartParams, Config, RatingStore, Trainer, TrainerParams, VoteBounds};
use std::fs::File;
use std::io::BufReader;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Corpus file written by `RatingStore::save_json`
    Json,
    /// `user::item::rating` lines
    Delimited,
    /// Directory of `<username>.json` files
    Directory,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Trains a movierec snapshot from a rating corpus", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Overrides `RUST_LOG`; `info` when neither is set
    #[arg(short, long)]
    log_level: Option<String>,

    /// Overrides `data.corpus_path`
    #[arg(long)]
    corpus: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    format: InputFormat,

    /// Overrides `data.snapshot_path`
    #[arg(short, long)]
    output: Option<String>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Items to drop before training, one per line
    #[arg(long)]
    ignore: Option<String>,

    /// Fit held-out users from scratch against the snapshot and report error
    #[arg(long)]
    cold_start_eval: bool,
}

fn load_store(format: InputFormat, path: &str) -> Result<RatingStore> {
    let store = match format {
        InputFormat::Json => RatingStore::load_json(path)?,
        InputFormat::Delimited => RatingStore::from_delimited(BufReader::new(File::open(path)?), "::")?,
        InputFormat::Directory => DirectoryRatingSource::new(path).load_corpus()?,
    };
    Ok(store)
}

fn log_filter(flag: Option<&str>, env: Option<String>) -> String {
    match (flag, env) {
        (Some(level), _) => level.to_string(),
        (None, Some(env)) if !env.is_empty() => env,
        _ => "info".to_string(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = log_filter(args.log_level.as_deref(), std::env::var("RUST_LOG").ok());
    std::env::set_var("RUST_LOG", filter);
    init_tracing();

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };
    if let Some(seed) = args.seed {
        config.training.seed = Some(seed);
    }
    let epochs = args.epochs.unwrap_or(config.training.epochs);
    info!("Training configuration: {:?}", config.training);

    let corpus = args.corpus.as_deref().unwrap_or(&config.data.corpus_path);
    let mut store = load_store(args.format, corpus)?;

    if let Some(ignore) = &args.ignore {
        let items: Vec<String> = std::fs::read_to_string(ignore)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let removed = store.remove_items_by_external(&items);
        info!("Ignored {} of {} listed items", removed, items.len());
    }

    let removed = store.filter_in_place(VoteBounds::at_least(config.training.min_votes));
    info!(
        "Dropped {} items under {} votes; {} items, sparsity {:.4}",
        removed,
        config.training.min_votes,
        store.item_count(),
        store.sparsity()?
    );

    let mut trainer = Trainer::new(store, TrainerParams::from(&config.training))?;
    if config.training.holdout_fraction > 0.0 {
        trainer.hold_out_users(config.training.holdout_fraction)?;
    }
    trainer.sample_test_set(config.training.test_fraction)?;
    trainer.initialize(config.training.init_mean, config.training.init_std_dev)?;
    trainer.train(epochs, config.training.shuffle)?;

    if trainer.test_pairs().is_empty() {
        warn!("Test set is empty, skipping validation");
    } else {
        let baseline = trainer.baseline_metrics()?;
        let model = trainer.validate()?;
        info!(
            "Test rmse {:.4} (global mean baseline {:.4}), mae {:.4} (baseline {:.4})",
            model.rmse, baseline.rmse, model.mae, baseline.mae
        );
    }

    let snapshot = trainer.snapshot()?;
    let output = args.output.as_deref().unwrap_or(&config.data.snapshot_path);
    snapshot.save(output)?;

    if args.cold_start_eval && trainer.held_out_users().is_empty() {
        warn!("No held-out users (training.holdout_fraction is 0), skipping cold-start evaluation");
    } else if args.cold_start_eval {
        let params = ColdStartParams::from(&config.cold_start);
        let evaluation = trainer.evaluate_cold_start(&params, config.training.cold_start_test_fraction)?;
        info!(
            "Cold-start evaluation: {} users, rmse {:.4}, mae {:.4}",
            evaluation.users, evaluation.metrics.rmse, evaluation.metrics.mae
        );
    }

    Ok(())
}
