//! RoadRisk CLI
//!
//! Trains the accident risk model, evaluates a saved bundle on labeled data
//! and scores unlabeled incidents.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roadrisk_core::{
    load_incidents_csv, load_incidents_csv_unlabeled, train_from_csv, HoldoutEvaluator,
    ModelBundle, PipelineConfig, RiskPredictor,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const BANNER_RULE: &str = "═══════════════════════════════════════════";

#[derive(Parser, Debug)]
#[command(name = "roadrisk")]
#[command(author = "RoadRisk Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Accident risk model trainer and predictor", long_about = None)]
struct Cli {
    /// Pipeline configuration file (TOML); ROADRISK__* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on a labeled CSV and write bundle.json + evaluation.json
    Train {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "models/roadrisk")]
        output: PathBuf,
    },
    /// Evaluate a saved bundle on a labeled CSV
    Evaluate {
        #[arg(short, long)]
        bundle: PathBuf,

        #[arg(short, long)]
        input: PathBuf,
    },
    /// Score unlabeled incidents
    Predict {
        #[arg(short, long)]
        bundle: PathBuf,

        #[arg(short, long)]
        input: PathBuf,

        /// Print assessments as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration to a TOML file
    InitConfig {
        #[arg(short, long, default_value = "roadrisk.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match &cli.command {
        Command::Train { input, output } => train(cli.config.as_deref(), input, output),
        Command::Evaluate { bundle, input } => evaluate(cli.config.as_deref(), bundle, input),
        Command::Predict {
            bundle,
            input,
            json,
        } => predict(bundle, input, *json),
        Command::InitConfig { output } => PipelineConfig::default()
            .save_to_file(output)
            .context("Failed to write configuration"),
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn train(config_path: Option<&Path>, input: &Path, output: &Path) -> Result<()> {
    info!("RoadRisk Trainer v{}", roadrisk_core::VERSION);
    info!("{}", BANNER_RULE);

    let config = PipelineConfig::load(config_path).context("Failed to load configuration")?;
    info!("Training configuration:");
    info!("  Holdout fraction: {}", config.split.holdout_fraction);
    info!("  Balance target ratio: {}", config.balance.target_ratio);
    info!("  Trees: {}", config.classifier.n_estimators);
    info!("  Max depth: {}", config.classifier.max_depth);
    info!("  Learning rate: {}", config.classifier.learning_rate);
    info!("  Positive class weight: {}", config.classifier.scale_pos_weight);

    info!("Loading dataset from: {}", input.display());
    let outcome = train_from_csv(input, &config).context("Training failed")?;

    info!("{}", BANNER_RULE);
    info!(
        "Partitions: {} training / {} holdout",
        outcome.train_rows, outcome.holdout_rows
    );
    info!(
        "Class counts before balancing: {} other / {} high risk",
        outcome.before_balance.other, outcome.before_balance.high_risk
    );
    info!(
        "Class counts after balancing:  {} other / {} high risk",
        outcome.after_balance.other, outcome.after_balance.high_risk
    );

    info!("Strongest risk correlations:");
    for c in &outcome.risk_correlations {
        info!("  {:<28} {:+.4}", c.feature, c.correlation);
    }

    std::fs::create_dir_all(output).context("Failed to create output directory")?;

    let bundle_path = output.join("bundle.json");
    outcome
        .bundle
        .save(&bundle_path)
        .context("Failed to save model bundle")?;

    let report_path = output.join("evaluation.json");
    let report_json =
        serde_json::to_string_pretty(&outcome.report).context("Failed to serialize report")?;
    std::fs::write(&report_path, report_json).context("Failed to write evaluation report")?;

    println!("{}", outcome.report);

    info!("{}", BANNER_RULE);
    info!("✓ Training completed successfully");
    info!("  Bundle: {}", bundle_path.display());
    info!("  Report: {}", report_path.display());
    Ok(())
}

fn evaluate(config_path: Option<&Path>, bundle_path: &Path, input: &Path) -> Result<()> {
    let config = PipelineConfig::load(config_path).context("Failed to load configuration")?;
    let bundle = ModelBundle::load(bundle_path)
        .with_context(|| format!("Failed to load bundle {}", bundle_path.display()))?;
    let records = load_incidents_csv(input).context("Failed to load dataset")?;

    let report = HoldoutEvaluator::new(config.evaluation.top_n_features)
        .evaluate(&bundle, &records)
        .context("Evaluation failed")?;
    println!("{report}");
    Ok(())
}

fn predict(bundle_path: &Path, input: &Path, json: bool) -> Result<()> {
    let predictor = RiskPredictor::from_path(bundle_path)
        .with_context(|| format!("Failed to load bundle {}", bundle_path.display()))?;
    let records = load_incidents_csv_unlabeled(input).context("Failed to load dataset")?;
    let assessments = predictor.assess(&records).context("Prediction failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&assessments).context("Failed to serialize assessments")?
        );
        return Ok(());
    }

    for assessment in &assessments {
        println!(
            "row {:>5}  p={:.4}  {}",
            assessment.row, assessment.probability, assessment.tier
        );
        for intervention in &assessment.interventions {
            println!("            - {intervention}");
        }
        for w in &assessment.warnings {
            warn!(
                "row {}: unknown {} '{}' treated as absent",
                w.row, w.column, w.value
            );
        }
    }
    Ok(())
}
