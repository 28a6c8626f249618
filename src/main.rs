use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ndarray::Array2;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use xgb_signal::codegen::{CodeEmitter, TargetKind};
use xgb_signal::config::{load_config, write_default_config, AppConfig};
use xgb_signal::ml::loader::{load_ensemble, load_feature_rows};
use xgb_signal::ml::{LoadedEnsemble, SignalPredictor};

#[derive(Parser)]
#[command(name = "xgb-signal")]
#[command(version = "0.1.0")]
#[command(about = "Turns XGBoost tree dumps into exact MQL5/Rust signal evaluators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "xgb-signal.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate evaluator source for a model
    Emit {
        /// Tree dump (dump_model text or JSON array of per-tree strings)
        #[arg(short, long)]
        model: PathBuf,
        /// Ordered feature names (one per line or JSON array)
        #[arg(short, long)]
        features: PathBuf,
        /// Output file (defaults to stdout)
        #[arg(short, long, conflicts_with = "out_dir")]
        output: Option<PathBuf>,
        /// Write `<prefix>_model.<ext>` into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Target runtime: mql5 or rust
        #[arg(short, long)]
        target: Option<String>,
        /// Identifier prefix for generated functions
        #[arg(long)]
        prefix: Option<String>,
        /// Output transform for the emitted entry point
        #[arg(long)]
        transform: Option<String>,
        /// Skip the signal entry point
        #[arg(long)]
        no_signal: bool,
    },
    /// Evaluate feature vectors from a JSON file
    Predict {
        #[arg(short, long)]
        model: PathBuf,
        #[arg(short, long)]
        features: PathBuf,
        /// JSON object of feature values, or an array of them
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Show per-tree statistics and the model digest
    Inspect {
        #[arg(short, long)]
        model: PathBuf,
        #[arg(short, long)]
        features: PathBuf,
    },
    /// Write a default configuration file
    InitConfig {
        #[arg(short, long, default_value = "xgb-signal.toml")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for generated output
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Emit {
            model,
            features,
            output,
            out_dir,
            target,
            prefix,
            transform,
            no_signal,
        } => {
            let config = load_config(Some(cli.config.as_path()))?;
            let destination = match (output, out_dir) {
                (Some(path), _) => Destination::File(path),
                (None, Some(dir)) => Destination::Dir(dir),
                (None, None) => Destination::Stdout,
            };
            run_emit(&config, &model, &features, destination, target, prefix, transform, no_signal)?;
        }
        Commands::Predict { model, features, input } => {
            let config = load_config(Some(cli.config.as_path()))?;
            run_predict(&config, &model, &features, &input)?;
        }
        Commands::Inspect { model, features } => {
            let config = load_config(Some(cli.config.as_path()))?;
            run_inspect(&config, &model, &features)?;
        }
        Commands::InitConfig { output, force } => {
            write_default_config(&output, force)?;
        }
    }

    Ok(())
}

fn load_model(config: &AppConfig, model: &Path, features: &Path) -> Result<LoadedEnsemble> {
    let options = config.model.load_options()?;
    load_ensemble(model, features, &options)
        .with_context(|| format!("Failed to build ensemble from {}", model.display()))
}

/// Where `emit` writes the generated source
enum Destination {
    Stdout,
    File(PathBuf),
    /// Directory receiving the target's conventional file name
    Dir(PathBuf),
}

#[allow(clippy::too_many_arguments)]
fn run_emit(
    config: &AppConfig,
    model: &Path,
    features: &Path,
    destination: Destination,
    target: Option<String>,
    prefix: Option<String>,
    transform: Option<String>,
    no_signal: bool,
) -> Result<()> {
    let loaded = load_model(config, model, features)?;

    let mut options = config.codegen.emit_options(&config.signal)?;
    if let Some(target) = target {
        options.target = target.parse::<TargetKind>()?;
    }
    if let Some(prefix) = prefix {
        options.prefix = prefix;
    }
    if no_signal {
        options.include_signal = false;
    }
    options.transform = transform;

    info!(
        "Emitting {} source for {} trees (prefix {})",
        options.target,
        loaded.ensemble.len(),
        options.prefix
    );
    let emitter = CodeEmitter::new(options);
    let source = emitter.emit(&loaded.ensemble)?;

    let path = match destination {
        Destination::Stdout => {
            print!("{}", source);
            return Ok(());
        }
        Destination::File(path) => path,
        Destination::Dir(dir) => dir.join(emitter.file_name()),
    };
    std::fs::write(&path, &source).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} ({} bytes)", path.display(), source.len());
    Ok(())
}

fn run_predict(config: &AppConfig, model: &Path, features: &Path, input: &Path) -> Result<()> {
    let loaded = load_model(config, model, features)?;
    let predictor = SignalPredictor::new(Arc::new(loaded.ensemble), config.signal.thresholds()?);
    let rows = load_feature_rows(input)?;

    if let [row] = rows.as_slice() {
        let prediction = predictor.predict_named(row)?;
        let out = json!({
            "margin": prediction.margin,
            "probability": prediction.probability,
            "signal": prediction.signal.as_str(),
            "code": prediction.signal.code(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let ensemble = predictor.ensemble();
    let width = ensemble.feature_map().len();
    let mut flat = Vec::with_capacity(rows.len() * width);
    for (i, row) in rows.iter().enumerate() {
        let buffer = ensemble
            .feature_map()
            .vectorize(row)
            .with_context(|| format!("Row {}", i))?;
        flat.extend(buffer);
    }
    let matrix = Array2::from_shape_vec((rows.len(), width), flat)?;
    let probabilities = ensemble.predict_batch(&matrix)?;
    info!("Evaluated {} rows", probabilities.len());

    let thresholds = predictor.thresholds();
    let out: Vec<_> = probabilities
        .iter()
        .enumerate()
        .map(|(row, &probability)| {
            let signal = thresholds.classify(probability);
            json!({
                "row": row,
                "probability": probability,
                "signal": signal.as_str(),
                "code": signal.code(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn run_inspect(config: &AppConfig, model: &Path, features: &Path) -> Result<()> {
    let loaded = load_model(config, model, features)?;
    let ensemble = &loaded.ensemble;

    println!("Model digest: {}", ensemble.digest());
    println!(
        "Trees: {}, features: {}, bias: {}, transform: {}",
        ensemble.len(),
        ensemble.feature_map().len(),
        ensemble.bias(),
        ensemble.transform()
    );
    println!("{:>6} {:>8} {:>8} {:>6} {:>8}", "tree", "nodes", "leaves", "depth", "dropped");
    for tree in ensemble.trees() {
        let dropped = loaded
            .unreachable
            .iter()
            .find(|(id, _)| *id == tree.id())
            .map(|(_, ids)| ids.len())
            .unwrap_or(0);
        println!(
            "{:>6} {:>8} {:>8} {:>6} {:>8}",
            tree.id(),
            tree.len(),
            tree.leaf_count(),
            tree.depth(),
            dropped
        );
    }
    Ok(())
}
