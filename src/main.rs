//! ML feedback loop service for prediction markets
//!
//! Commands cover the full loop: label training data, train the two models,
//! inspect the registry, and serve predictions.

use clap::{Parser, Subcommand};
use market_ml::{
    config::Config,
    etl,
    registry::{self, ModelCache, ModelRegistry, CORRECTION_MODEL, USEFULNESS_MODEL},
    server::{self, AppState},
    serving::CorrectionEngine,
    storage::SqliteRepository,
    training::{self, TrainingOutcome},
    types::Post,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "market-ml")]
#[command(about = "ML feedback loop for prediction markets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the prediction API
    Serve,
    /// Label posts for all resolved markets
    Etl {
        /// Also export JSON snapshots for offline training
        #[arg(long)]
        export: bool,
    },
    /// Train the market correction model from the latest export
    TrainCorrection {
        /// Version tag for the artifact (defaults to a timestamp)
        #[arg(long)]
        version: Option<String>,
    },
    /// Train the post usefulness model from the latest export
    TrainUsefulness {
        /// Version tag for the artifact (defaults to a timestamp)
        #[arg(long)]
        version: Option<String>,
    },
    /// Show training data counts and registered models
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Etl { export } => run_etl(config, export).await,
        Commands::TrainCorrection { version } => train_correction(config, version).await,
        Commands::TrainUsefulness { version } => train_usefulness(config, version).await,
        Commands::Status => show_status(config).await,
    }
}

async fn connect(config: &Config) -> anyhow::Result<Arc<SqliteRepository>> {
    Ok(Arc::new(SqliteRepository::connect(&config.database.url).await?))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let repo = connect(&config).await?;
    let registry = ModelRegistry::new(config.paths.models_dir(), repo.clone());
    let state = Arc::new(AppState {
        engine: CorrectionEngine::new(ModelCache::new(registry)),
        repo: repo.clone(),
        training: config.training.clone(),
        internal_secret: config.server.internal_secret.clone(),
    });

    server::serve(state, &config.server.host, config.server.port).await?;
    Ok(())
}

async fn run_etl(config: Config, export: bool) -> anyhow::Result<()> {
    let repo = connect(&config).await?;
    let summary = etl::run(repo.as_ref()).await?;
    println!(
        "labeled {} posts across {} markets ({} skipped)",
        summary.posts_labeled, summary.markets_processed, summary.markets_skipped
    );

    if export {
        let paths = etl::export(repo.as_ref(), &config.paths.data_dir()).await?;
        println!("exported {} and {}", paths.markets.display(), paths.posts.display());
    }
    Ok(())
}

async fn train_correction(config: Config, version: Option<String>) -> anyhow::Result<()> {
    let (markets, labeled) = etl::load_training_data(&config.paths.data_dir())?;

    let mut posts_by_market: HashMap<String, Vec<Post>> = HashMap::new();
    for lp in &labeled {
        posts_by_market
            .entry(lp.post.market_id.clone())
            .or_default()
            .push(lp.post.clone());
    }

    let samples = training::build_market_dataset(&markets, &posts_by_market);
    let outcome =
        training::train_correction_model(&samples, &config.correction_model, &config.training)?;

    let trained = match outcome {
        TrainingOutcome::Skipped { reason } => {
            println!("training skipped: {reason}");
            return Ok(());
        }
        TrainingOutcome::Trained(trained) => trained,
    };

    let repo = connect(&config).await?;
    let registry = ModelRegistry::new(config.paths.models_dir(), repo);
    let saved = registry
        .save(CORRECTION_MODEL, version, &trained, &config.correction_model)
        .await?;
    let report = registry::write_training_report(
        &config.paths.reports_dir(),
        CORRECTION_MODEL,
        &saved.version,
        &trained,
    )?;

    println!("trained {CORRECTION_MODEL} {} ({} samples)", saved.version, trained.train_size);
    println!("metrics: {}", trained.metrics);
    println!("report: {}", report.display());
    Ok(())
}

async fn train_usefulness(config: Config, version: Option<String>) -> anyhow::Result<()> {
    let (_, labeled) = etl::load_training_data(&config.paths.data_dir())?;

    let outcome =
        training::train_usefulness_model(&labeled, &config.usefulness_model, &config.training)?;

    let trained = match outcome {
        TrainingOutcome::Skipped { reason } => {
            println!("training skipped: {reason}");
            return Ok(());
        }
        TrainingOutcome::Trained(trained) => trained,
    };

    let repo = connect(&config).await?;
    let registry = ModelRegistry::new(config.paths.models_dir(), repo);
    let saved = registry
        .save(USEFULNESS_MODEL, version, &trained, &config.usefulness_model)
        .await?;
    let report = registry::write_training_report(
        &config.paths.reports_dir(),
        USEFULNESS_MODEL,
        &saved.version,
        &trained,
    )?;

    println!("trained {USEFULNESS_MODEL} {} ({} samples)", saved.version, trained.train_size);
    println!("metrics: {}", trained.metrics);
    println!("report: {}", report.display());
    Ok(())
}

async fn show_status(config: Config) -> anyhow::Result<()> {
    let repo = connect(&config).await?;
    let registry = ModelRegistry::new(config.paths.models_dir(), repo.clone());
    let state = AppState {
        engine: CorrectionEngine::new(ModelCache::new(registry)),
        repo: repo.clone(),
        training: config.training.clone(),
        internal_secret: String::new(),
    };

    let status = server::build_status(&state).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
