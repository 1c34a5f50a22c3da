//! EquiVision CLI
//!
//! Train, evaluate and run the horse-breed classifier.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use equivision::backend::{select_device, CpuBackend, CpuTrainingBackend};
use equivision::dataset::{split, BatchLoader, ClassCatalog, SampleProvider, Transform};
use equivision::inference::{load_checkpoint, Predictor};
use equivision::model::ModelArchitecture;
use equivision::training::{evaluate, run_training, TrainingConfig, DEFAULT_NUM_WORKERS};
use equivision::utils::format_duration;
use equivision::utils::logging::{init_logging, LogConfig};

/// Horse-breed image classification with Burn
#[derive(Parser, Debug)]
#[command(name = "equivision")]
#[command(version)]
#[command(about = "Fine-tune and run a horse-breed image classifier", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fine-tune the classifier and keep the best validation checkpoint
    Train {
        /// JSON training config; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory with labels.json and the images
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Where the checkpoint is written
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Fraction of samples used for training
        #[arg(long)]
        train_ratio: Option<f64>,

        #[arg(long)]
        image_size: Option<u32>,

        /// Decode/augment worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Backbone: efficientnet-b0 or resnet18
        #[arg(short, long)]
        architecture: Option<String>,

        /// torchvision `.pth` weights for the backbone instead of the cached download
        #[arg(long)]
        weights: Option<String>,

        /// Start the backbone from random init
        #[arg(long, default_value = "false")]
        no_pretrained: bool,

        /// Train only the classification head
        #[arg(long, default_value = "false")]
        freeze_backbone: bool,

        /// Write the effective config here before training
        #[arg(long)]
        save_config: Option<PathBuf>,

        /// Run on the CPU even if a GPU is available
        #[arg(long, default_value = "false")]
        cpu: bool,

        /// Hide progress bars
        #[arg(long, default_value = "false")]
        no_progress: bool,
    },

    /// Recompute accuracy of a checkpoint on its validation split
    Evaluate {
        /// Path to the `.mpk` checkpoint
        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long)]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        #[arg(short, long, default_value_t = DEFAULT_NUM_WORKERS)]
        workers: usize,

        #[arg(long, default_value = "false")]
        cpu: bool,
    },

    /// Classify one image
    Predict {
        /// Path to the `.mpk` checkpoint
        #[arg(short, long)]
        model: PathBuf,

        /// Image to classify
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short = 'k', long, default_value = "3")]
        top_k: usize,

        #[arg(long, default_value = "false")]
        cpu: bool,
    },

    /// Show dataset statistics
    Stats {
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Ratio used to report train/validation partition sizes
        #[arg(long, default_value = "0.8")]
        train_ratio: f64,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            data_dir,
            output_dir,
            epochs,
            batch_size,
            learning_rate,
            train_ratio,
            image_size,
            workers,
            seed,
            architecture,
            weights,
            no_pretrained,
            freeze_backbone,
            save_config,
            cpu,
            no_progress,
        } => {
            let mut cfg = match config {
                Some(path) => {
                    TrainingConfig::load(&path).with_context(|| format!("loading config {:?}", path))?
                }
                None => TrainingConfig::default(),
            };

            if let Some(v) = data_dir {
                cfg.data_dir = v;
            }
            if let Some(v) = output_dir {
                cfg.output_dir = v;
            }
            if let Some(v) = epochs {
                cfg.num_epochs = v;
            }
            if let Some(v) = batch_size {
                cfg.batch_size = v;
            }
            if let Some(v) = learning_rate {
                cfg.learning_rate = v;
            }
            if let Some(v) = train_ratio {
                cfg.train_ratio = v;
            }
            if let Some(v) = image_size {
                cfg.image_size = v;
            }
            if let Some(v) = workers {
                cfg.num_workers = v;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            if let Some(name) = architecture {
                cfg.model.architecture = ModelArchitecture::parse(&name)
                    .with_context(|| format!("unknown architecture '{}'", name))?;
            }
            if weights.is_some() {
                cfg.model.pretrained_weights = weights;
            }
            if no_pretrained {
                cfg.model.pretrained = false;
            }
            if freeze_backbone {
                cfg.model.freeze_backbone = true;
            }
            if no_progress {
                cfg.show_progress = false;
            }
            cfg.validate()?;

            if let Some(path) = save_config {
                cfg.save(&path).with_context(|| format!("writing config {:?}", path))?;
                info!("Config written to {:?}", path);
            }

            match select_device(cpu) {
                #[cfg(feature = "cuda")]
                equivision::backend::ComputeDevice::Cuda(id) => cmd_train::<equivision::backend::GpuTrainingBackend>(
                    &cfg,
                    burn_cuda::CudaDevice::new(id),
                )?,
                _ => cmd_train::<CpuTrainingBackend>(&cfg, Default::default())?,
            }
        }

        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
            workers,
            cpu,
        } => match select_device(cpu) {
            #[cfg(feature = "cuda")]
            equivision::backend::ComputeDevice::Cuda(id) => cmd_evaluate::<equivision::backend::GpuBackend>(
                &model,
                &data_dir,
                batch_size,
                workers,
                burn_cuda::CudaDevice::new(id),
            )?,
            _ => cmd_evaluate::<CpuBackend>(&model, &data_dir, batch_size, workers, Default::default())?,
        },

        Commands::Predict {
            model,
            input,
            top_k,
            cpu,
        } => match select_device(cpu) {
            #[cfg(feature = "cuda")]
            equivision::backend::ComputeDevice::Cuda(id) => cmd_predict::<equivision::backend::GpuBackend>(
                &model,
                &input,
                top_k,
                burn_cuda::CudaDevice::new(id),
            )?,
            _ => cmd_predict::<CpuBackend>(&model, &input, top_k, Default::default())?,
        },

        Commands::Stats {
            data_dir,
            train_ratio,
            seed,
        } => cmd_stats(&data_dir, train_ratio, seed)?,
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +----------------------------------------------------+
 |   EquiVision                                       |
 |   Horse-breed classification with Burn + Rust      |
 +----------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_train<B: AutodiffBackend>(config: &TrainingConfig, device: B::Device) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data:         {:?}", config.data_dir);
    println!("  Output:       {:?}", config.output_dir);
    println!("  Backbone:     {}", config.model.architecture);
    println!("  Epochs:       {}", config.num_epochs);
    println!("  Batch size:   {}", config.batch_size);
    println!("  LR:           {}", config.learning_rate);
    println!("  Train ratio:  {}", config.train_ratio);
    println!();

    let outcome = run_training::<B>(config, device).context("training failed")?;

    println!();
    println!("{}", "Training Summary:".green().bold());
    println!("  Samples:      {} train / {} val", outcome.train_samples, outcome.val_samples);
    println!("  Elapsed:      {}", format_duration(outcome.elapsed));
    println!("  Best val acc: {:.4}", outcome.best_accuracy);
    match outcome.best_epoch {
        Some(epoch) => {
            println!("  Best epoch:   {}", epoch + 1);
            println!("  Checkpoint:   {:?}", outcome.checkpoint_path);
        }
        None => println!("  {}", "Validation accuracy never improved; no checkpoint written".yellow()),
    }

    Ok(())
}

fn cmd_evaluate<B: Backend>(
    model_path: &Path,
    data_dir: &Path,
    batch_size: usize,
    workers: usize,
    device: B::Device,
) -> Result<()> {
    let loaded = load_checkpoint::<B>(model_path, &device)
        .with_context(|| format!("loading checkpoint {:?}", model_path))?;
    let metadata = &loaded.metadata;

    let catalog = ClassCatalog::build(data_dir)?;
    if catalog.classes() != metadata.classes.as_slice() {
        bail!(
            "dataset classes {:?} differ from checkpoint classes {:?}",
            catalog.classes(),
            metadata.classes
        );
    }

    let split = split(catalog.len(), metadata.train_ratio, metadata.seed);
    let provider = SampleProvider::new(
        catalog.samples(),
        split.validation,
        Transform::evaluation(metadata.image_size),
    )?;
    let loader = BatchLoader::new(workers, batch_size, 2)?;

    let (metrics, confusion) = evaluate(&loaded.model, &provider, &loader, &device, true)?;

    println!("{}", "Evaluation:".cyan().bold());
    println!("  Samples:  {}", metrics.samples);
    println!("  Loss:     {:.4}", metrics.loss());
    println!("  Accuracy: {:.4}", metrics.accuracy());
    println!(
        "  Checkpoint recorded {:.4} at epoch {}",
        metadata.val_accuracy,
        metadata.epoch + 1
    );
    println!();
    println!("{}", "Per-breed accuracy:".cyan().bold());
    for (name, acc) in catalog.classes().iter().zip(confusion.per_class_accuracy()) {
        match acc {
            Some(acc) => println!("  {:30} {:>6.2}%", name, acc * 100.0),
            None => println!("  {:30} {:>7}", name, "-"),
        }
    }
    println!();
    println!("{}", confusion.display(catalog.classes()));

    Ok(())
}

fn cmd_predict<B: Backend>(model_path: &Path, input: &Path, top_k: usize, device: B::Device) -> Result<()> {
    let loaded = load_checkpoint::<B>(model_path, &device)
        .with_context(|| format!("loading checkpoint {:?}", model_path))?;
    let predictor = Predictor::from_checkpoint(loaded, device).with_top_k(top_k);

    let result = predictor
        .predict_file(input)
        .with_context(|| format!("classifying {:?}", input))?;

    println!("{}", "Prediction:".cyan().bold());
    println!("{}", result.display());
    Ok(())
}

fn cmd_stats(data_dir: &Path, train_ratio: f64, seed: u64) -> Result<()> {
    let catalog = ClassCatalog::build(data_dir)?;

    println!("{}", "Dataset Statistics:".cyan().bold());
    println!("  Samples:  {}", catalog.len());
    println!("  Classes:  {}", catalog.num_classes());
    println!("  Skipped:  {}", catalog.skipped());
    println!();

    let split = split(catalog.len(), train_ratio, seed);
    println!("{}", "Split:".yellow().bold());
    println!("  Train:      {}", split.train.len());
    println!("  Validation: {}", split.validation.len());
    println!();

    println!("{}", "Class Distribution:".cyan().bold());
    let total = catalog.len().max(1) as f64;
    for (name, count) in catalog.classes().iter().zip(catalog.class_counts()) {
        println!("  {:30} {:>5} ({:>5.1}%)", name, count, 100.0 * count as f64 / total);
    }

    Ok(())
}
