//! ρ-LP CLI
//!
//! Command-line interface for activation-region LP attacks.
//!
//! # Commands
//!
//! - `rho attack --model m.json --data-dir data/` - LP-vs-FGSM comparison
//! - `rho eval --model m.json --data-dir data/` - clean accuracy
//! - `rho inspect --model m.json` - architecture and parameter counts

use clap::{Parser, Subcommand};
use rho_attack::{run_comparison, AttackConfig, TargetRule};
use rho_core::{Result, RhoError};
use rho_lp::RegionConfig;
use rho_mnist::{load_dataset, Split};
use rho_net::{detect_architecture, load_checkpoint, Network};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rho")]
#[command(about = "Activation-region LP attacks on piecewise-linear classifiers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the LP-vs-FGSM attack comparison over dataset samples
    Attack {
        /// Checkpoint file (.json or .json.gz)
        #[arg(long)]
        model: PathBuf,
        /// Directory containing the IDX dataset files
        #[arg(long = "data-dir")]
        data_dir: PathBuf,
        /// Number of samples to attack
        #[arg(long, default_value = "10")]
        samples: usize,
        /// ℓ∞ perturbation budget
        #[arg(long, default_value = "0.1")]
        epsilon: f32,
        /// Minimum valid pixel value
        #[arg(long, default_value = "0.0")]
        min_val: f32,
        /// Maximum valid pixel value
        #[arg(long, default_value = "1.0")]
        max_val: f32,
        /// Shuffle seed for sample selection
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Use the training split instead of the test split
        #[arg(long)]
        train: bool,
        /// Attack toward (label+1) mod classes instead of away from the label
        #[arg(long)]
        targeted: bool,
        /// Attack toward a fixed class (overrides --targeted)
        #[arg(long)]
        target_label: Option<usize>,
        /// Disable the parallel Jacobian fan-out
        #[arg(long)]
        sequential: bool,
        /// Emit the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Measure clean accuracy of a checkpoint on dataset samples
    Eval {
        /// Checkpoint file (.json or .json.gz)
        #[arg(long)]
        model: PathBuf,
        /// Directory containing the IDX dataset files
        #[arg(long = "data-dir")]
        data_dir: PathBuf,
        /// Limit the number of samples (default: whole split)
        #[arg(long)]
        samples: Option<usize>,
        /// Use the training split instead of the test split
        #[arg(long)]
        train: bool,
        /// Emit the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show checkpoint architecture and parameter counts
    Inspect {
        /// Checkpoint file (.json or .json.gz)
        #[arg(long)]
        model: PathBuf,
        /// Emit the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Attack {
            model,
            data_dir,
            samples,
            epsilon,
            min_val,
            max_val,
            seed,
            train,
            targeted,
            target_label,
            sequential,
            json,
        } => {
            let network = load_checkpoint(&model)?;
            let split = if train { Split::Train } else { Split::Test };
            let mut dataset = load_dataset(&data_dir, split)?;
            dataset.shuffle(seed);

            let target = match (target_label, targeted) {
                (Some(label), _) => TargetRule::Fixed(label),
                (None, true) => TargetRule::NextLabel,
                (None, false) => TargetRule::TrueLabelLoss,
            };
            let config = AttackConfig {
                region: RegionConfig {
                    epsilon,
                    min_val,
                    max_val,
                    parallel: !sequential,
                },
                target,
                ..AttackConfig::default()
            };

            let batch: Vec<_> = dataset
                .samples
                .iter()
                .take(samples)
                .map(|s| (s.image.clone().into_dyn(), usize::from(s.label)))
                .collect();
            let report = run_comparison(&network, &batch, &config)?;

            if json {
                println!("{}", to_json(&report)?);
            } else {
                for outcome in &report.outcomes {
                    println!(
                        "sample {} (label {}): correct prob went from {:.6} to {:.6} (fgsm {:.6})",
                        outcome.sample_index,
                        outcome.label,
                        outcome.clean_prob,
                        outcome.lp_prob,
                        outcome.fgsm_prob
                    );
                }
                let summary = &report.summary;
                println!();
                println!(
                    "{} samples: LP wins {}, FGSM wins {}, ties {}",
                    summary.samples, summary.lp_wins, summary.fgsm_wins, summary.ties
                );
                println!(
                    "mean correct prob: clean {:.6}, lp {:.6}, fgsm {:.6}",
                    summary.mean_clean_prob, summary.mean_lp_prob, summary.mean_fgsm_prob
                );
            }
        }
        Commands::Eval {
            model,
            data_dir,
            samples,
            train,
            json,
        } => {
            let network = load_checkpoint(&model)?;
            let split = if train { Split::Train } else { Split::Test };
            let dataset = load_dataset(&data_dir, split)?;
            let limit = samples.unwrap_or(dataset.len());

            let mut correct = 0usize;
            let mut total = 0usize;
            for sample in dataset.samples.iter().take(limit) {
                let logits = network.logits(&sample.image.clone().into_dyn())?;
                if argmax(logits.as_slice().unwrap_or(&[])) == usize::from(sample.label) {
                    correct += 1;
                }
                total += 1;
            }
            if total == 0 {
                return Err(RhoError::InvalidConfig(
                    "no samples to evaluate".to_string(),
                ));
            }
            let accuracy = correct as f32 / total as f32;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "samples": total,
                        "correct": correct,
                        "accuracy": accuracy,
                    })
                );
            } else {
                println!("accuracy: {correct}/{total} = {accuracy:.4}");
            }
        }
        Commands::Inspect { model, json } => {
            let network = load_checkpoint(&model)?;
            if json {
                println!("{}", inspect_json(&network));
            } else {
                println!("architecture: {}", detect_architecture(&network));
                for (i, layer) in network.layers.iter().enumerate() {
                    println!("  layer {:2}: {:8} {} params", i, layer.kind(), layer.num_params());
                }
                println!("total parameters: {}", network.num_params());
            }
        }
    }
    Ok(())
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| RhoError::InvalidConfig(e.to_string()))
}

fn inspect_json(network: &Network) -> serde_json::Value {
    let layers: Vec<_> = network
        .layers
        .iter()
        .enumerate()
        .map(|(i, layer)| {
            serde_json::json!({
                "index": i,
                "kind": layer.kind(),
                "params": layer.num_params(),
            })
        })
        .collect();
    serde_json::json!({
        "architecture": detect_architecture(network),
        "layers": layers,
        "total_params": network.num_params(),
    })
}
