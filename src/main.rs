//! Seedling Classifier CLI
//!
//! Entry point for the plant seedling pipeline: dataset statistics,
//! train/test split, class balancing, CNN training and test-set prediction.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use seedling_classifier::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use seedling_classifier::utils::format_duration;
use seedling_classifier::utils::logging::{init_logging, LogConfig, LogLevel};
use seedling_classifier::{
    FineTuneConfig, PipelineConfig, PipelineContext, SeedlingDataset, VERSION,
};

/// Plant seedling species classification with Burn
#[derive(Parser, Debug)]
#[command(name = "seedling")]
#[command(version)]
#[command(about = "Balance, train and predict plant seedling species with Burn", long_about = None)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(flatten)]
    data: DataArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Class-per-directory training images
    #[arg(long, global = true)]
    train_dir: Option<PathBuf>,

    /// Flat directory of images to predict
    #[arg(long, global = true)]
    test_dir: Option<PathBuf>,

    /// Output directory of the balanced training set
    #[arg(long, global = true)]
    augmented_dir: Option<PathBuf>,

    /// Directory for checkpoints and reports
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    /// Accept class directories other than the 12 known species
    #[arg(long, global = true, default_value = "false")]
    lenient_labels: bool,
}

#[derive(Args, Debug, Default)]
struct SplitArgs {
    /// Fraction of samples held out for validation
    #[arg(long)]
    test_fraction: Option<f64>,

    /// Split per class instead of over the whole set
    #[arg(long, default_value = "false")]
    stratified: bool,
}

#[derive(Args, Debug, Default)]
struct BalanceArgs {
    /// Augmented images generated per class
    #[arg(short = 'n', long)]
    samples_per_class: Option<usize>,

    /// Replace an existing balanced directory
    #[arg(long, default_value = "false")]
    overwrite: bool,
}

#[derive(Args, Debug, Default)]
struct TrainArgs {
    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(short, long)]
    learning_rate: Option<f64>,

    /// Stop after N epochs without a better validation F1
    #[arg(long)]
    patience: Option<usize>,

    /// Train on the raw training split instead of the balanced set
    #[arg(long, default_value = "false")]
    no_balance: bool,

    /// Start from an earlier checkpoint instead of random weights
    #[arg(long, value_name = "CHECKPOINT")]
    fine_tune: Option<PathBuf>,

    /// Leading convolutional blocks to keep fixed while fine-tuning
    #[arg(long, requires = "fine_tune")]
    freeze_blocks: Option<usize>,

    /// Release the deepest frozen block every N epochs
    #[arg(long, requires = "fine_tune")]
    unfreeze_every: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show per-class sample counts of the training directory
    Stats,

    /// Split the training directory and report the subset sizes
    Split {
        #[command(flatten)]
        split: SplitArgs,

        /// Write the split as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the balanced, augmented training set
    Balance {
        #[command(flatten)]
        split: SplitArgs,

        #[command(flatten)]
        balance: BalanceArgs,
    },

    /// Train the CNN and checkpoint the best epoch
    Train {
        #[command(flatten)]
        split: SplitArgs,

        #[command(flatten)]
        balance: BalanceArgs,

        #[command(flatten)]
        train: TrainArgs,
    },

    /// Predict the test directory with a trained model
    Predict {
        /// Submission CSV to write
        #[arg(short, long)]
        submission: Option<PathBuf>,
    },

    /// Run split, balance, train and predict in one go
    Run {
        #[command(flatten)]
        split: SplitArgs,

        #[command(flatten)]
        balance: BalanceArgs,

        #[command(flatten)]
        train: TrainArgs,

        #[arg(short, long)]
        submission: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_toml(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    apply_data_args(&mut config, &cli.data);

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        config.logging.clone()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::from_name(level);
    }
    if let Err(e) = init_logging(&log_config) {
        eprintln!("{} {}", "Warning:".yellow(), e);
    }

    print_banner();

    let start = std::time::Instant::now();
    match cli.command {
        Commands::Stats => cmd_stats(&config)?,
        Commands::Split { split, output } => {
            apply_split_args(&mut config, &split);
            cmd_split(config, output)?;
        }
        Commands::Balance { split, balance } => {
            apply_split_args(&mut config, &split);
            apply_balance_args(&mut config, &balance);
            cmd_balance(config)?;
        }
        Commands::Train {
            split,
            balance,
            train,
        } => {
            apply_split_args(&mut config, &split);
            apply_balance_args(&mut config, &balance);
            apply_train_args(&mut config, &train);
            cmd_train(config)?;
        }
        Commands::Predict { submission } => {
            if let Some(path) = submission {
                config.data.submission = path;
            }
            cmd_predict(config)?;
        }
        Commands::Run {
            split,
            balance,
            train,
            submission,
        } => {
            apply_split_args(&mut config, &split);
            apply_balance_args(&mut config, &balance);
            apply_train_args(&mut config, &train);
            if let Some(path) = submission {
                config.data.submission = path;
            }
            cmd_run(config)?;
        }
    }

    println!(
        "{} in {}",
        "Done".green().bold(),
        format_duration(start.elapsed().as_secs_f64())
    );
    Ok(())
}

fn apply_data_args(config: &mut PipelineConfig, args: &DataArgs) {
    if let Some(dir) = &args.train_dir {
        config.data.train_dir = dir.clone();
    }
    if let Some(dir) = &args.test_dir {
        config.data.test_dir = dir.clone();
    }
    if let Some(dir) = &args.augmented_dir {
        config.data.augmented_dir = dir.clone();
    }
    if let Some(dir) = &args.artifact_dir {
        config.data.artifact_dir = dir.clone();
    }
    if args.lenient_labels {
        config.data.strict_labels = false;
    }
}

fn apply_split_args(config: &mut PipelineConfig, args: &SplitArgs) {
    if let Some(fraction) = args.test_fraction {
        config.split.test_fraction = fraction;
    }
    if args.stratified {
        config.split.stratified = true;
    }
}

fn apply_balance_args(config: &mut PipelineConfig, args: &BalanceArgs) {
    if let Some(n) = args.samples_per_class {
        config.balance.samples_per_class = n;
    }
    if args.overwrite {
        config.balance.overwrite = true;
    }
}

fn apply_train_args(config: &mut PipelineConfig, args: &TrainArgs) {
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(lr) = args.learning_rate {
        config.training.learning_rate = lr;
    }
    if args.patience.is_some() {
        config.training.patience = args.patience;
    }
    if args.no_balance {
        config.data.use_balanced = false;
    }
    if let Some(checkpoint) = &args.fine_tune {
        let fine_tune = config
            .training
            .fine_tune
            .get_or_insert_with(|| FineTuneConfig::new(checkpoint.clone()));
        fine_tune.checkpoint = checkpoint.clone();
        if let Some(blocks) = args.freeze_blocks {
            fine_tune.freeze_blocks = blocks;
        }
        if args.unfreeze_every.is_some() {
            fine_tune.unfreeze_every = args.unfreeze_every;
        }
    }
}

fn print_banner() {
    println!(
        "{}",
        format!(
            r#"
 ╔══════════════════════════════════════════════════════╗
 ║   🌱 Seedling Classifier v{:<27}║
 ║   Plant seedling species classification with Burn    ║
 ╚══════════════════════════════════════════════════════╝
"#,
            VERSION
        )
        .green()
    );
}

fn cmd_stats(config: &PipelineConfig) -> Result<()> {
    let dataset = SeedlingDataset::new(&config.data.train_dir)
        .with_context(|| format!("Failed to load {:?}", config.data.train_dir))?;
    let stats = dataset.get_stats();

    println!("{}", "Dataset Statistics:".cyan().bold());
    print!("{}", stats.display());
    println!("  Imbalance ratio (max/min): {:.2}", stats.imbalance_ratio());
    Ok(())
}

/// Load, validate and split
fn prepare(config: PipelineConfig) -> Result<PipelineContext> {
    config.validate()?;
    let mut ctx = PipelineContext::new(config);

    let dataset = ctx.load().context("Failed to load training directory")?;
    println!(
        "  {} {} images in {} classes",
        "Loaded".cyan(),
        dataset.len(),
        dataset.num_classes()
    );

    let split = ctx.split().context("Failed to split dataset")?;
    println!(
        "  {} {} train / {} test",
        "Split".cyan(),
        split.train.len(),
        split.test.len()
    );
    Ok(ctx)
}

fn cmd_split(config: PipelineConfig, output: Option<PathBuf>) -> Result<()> {
    let ctx = prepare(config)?;
    if let Some(path) = output {
        let split = ctx
            .dataset_split()
            .context("Split is missing after preparation")?;
        std::fs::write(&path, serde_json::to_string_pretty(split)?)
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("  {} {:?}", "Saved split to".cyan(), path);
    }
    Ok(())
}

fn balance(ctx: &mut PipelineContext) -> Result<()> {
    let report = ctx.balance().context("Failed to balance classes")?;
    println!("{}", "Class Balance:".cyan().bold());
    for class in &report.classes {
        println!(
            "  {:28} {:5} originals -> {:5} augmented",
            class.class_name, class.original_count, class.generated
        );
    }
    Ok(())
}

fn cmd_balance(config: PipelineConfig) -> Result<()> {
    let mut ctx = prepare(config)?;
    balance(&mut ctx)
}

fn train(ctx: &mut PipelineContext) -> Result<()> {
    if ctx.config().data.use_balanced {
        balance(ctx)?;
    }

    println!(
        "{} on {}",
        "Training".green().bold(),
        backend_name()
    );
    let report = ctx
        .train::<TrainingBackend>(&default_device())
        .context("Training failed")?;

    info!("Training report written next to {:?}", report.checkpoint);
    println!();
    println!("{}", "Best Validation Epoch:".cyan().bold());
    println!("  Epoch: {} of {}", report.best_epoch, report.epochs_run);
    print!("{}", report.best_evaluation.metrics.display());
    println!(
        "  Thresholded precision {:.4} | recall {:.4} | F1 {:.4}",
        report.best_evaluation.thresholded.precision,
        report.best_evaluation.thresholded.recall,
        report.best_evaluation.thresholded.f1
    );
    println!(
        "{}",
        report
            .best_evaluation
            .metrics
            .confusion_matrix
            .display(Some(ctx.labels()?.classes()))
    );
    println!("  💾 Saved to: {:?}", report.checkpoint);
    Ok(())
}

fn cmd_train(config: PipelineConfig) -> Result<()> {
    let mut ctx = prepare(config)?;
    train(&mut ctx)
}

fn predict(ctx: &PipelineContext) -> Result<()> {
    println!("{} on {}", "Predicting".green().bold(), backend_name());
    let predictions = ctx
        .predict::<DefaultBackend>(&default_device())
        .context("Prediction failed")?;

    println!(
        "  {} {} predictions to {:?}",
        "Wrote".cyan(),
        predictions.len(),
        ctx.config().data.submission
    );
    Ok(())
}

fn cmd_predict(config: PipelineConfig) -> Result<()> {
    config.validate()?;
    predict(&PipelineContext::new(config))
}

fn cmd_run(config: PipelineConfig) -> Result<()> {
    let mut ctx = prepare(config)?;
    train(&mut ctx)?;
    predict(&ctx)
}
