//! Epoch loop for the horse-breed classifier
//!
//! The calling thread owns the model and optimizer. Batches arrive already
//! decoded and transformed from the [`BatchLoader`] pool.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::{GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::{
    split, BatchLoader, ClassCatalog, HorseBatch, HorseBatcher, SampleProvider, Transform,
};
use crate::model::HorseClassifier;
use crate::training::checkpoint::{CheckpointMetadata, CheckpointWriter};
use crate::training::scheduler::LearningRateScheduler;
use crate::training::TrainingConfig;
use crate::utils::error::{EquiVisionError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{ConfusionMatrix, PhaseMetrics};

/// Per-epoch results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train: PhaseMetrics,
    pub val: PhaseMetrics,
    pub improved: bool,
}

/// State carried across the epochs of one run
#[derive(Debug)]
pub struct TrainingRun<B: AutodiffBackend> {
    pub epoch: usize,
    /// Starts at 0.0 and never decreases
    pub best_accuracy: f64,
    pub best_epoch: Option<usize>,
    best_model: HorseClassifier<B>,
    pub history: Vec<EpochRecord>,
}

impl<B: AutodiffBackend> TrainingRun<B> {
    /// `initial` is what the run returns if validation never improves
    pub fn new(initial: HorseClassifier<B>) -> Self {
        Self {
            epoch: 0,
            best_accuracy: 0.0,
            best_epoch: None,
            best_model: initial,
            history: Vec::new(),
        }
    }

    /// Record an epoch; snapshots `model` when validation accuracy strictly improves
    pub fn observe(&mut self, mut record: EpochRecord, model: &HorseClassifier<B>) -> bool {
        let accuracy = record.val.accuracy();
        record.improved = accuracy > self.best_accuracy;

        if record.improved {
            self.best_accuracy = accuracy;
            self.best_epoch = Some(record.epoch);
            self.best_model = model.clone();
        }

        self.epoch = record.epoch + 1;
        let improved = record.improved;
        self.history.push(record);
        improved
    }

    pub fn best_model(&self) -> &HorseClassifier<B> {
        &self.best_model
    }

    pub fn into_best_model(self) -> HorseClassifier<B> {
        self.best_model
    }
}

/// Result of [`run_training`]
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    /// Best-validation weights (the initial weights if nothing improved)
    pub model: HorseClassifier<B>,
    pub classes: Vec<String>,
    pub best_accuracy: f64,
    pub best_epoch: Option<usize>,
    pub history: Vec<EpochRecord>,
    pub checkpoint_path: PathBuf,
    pub checkpoint_writes: usize,
    pub train_samples: usize,
    pub val_samples: usize,
    pub elapsed: Duration,
}

/// Drives the train and validate phases of each epoch
pub struct Trainer<B: AutodiffBackend, O> {
    model: HorseClassifier<B>,
    optimizer: O,
    loader: BatchLoader,
    batcher: HorseBatcher,
    loss: CrossEntropyLoss<B>,
    device: B::Device,
    show_progress: bool,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<HorseClassifier<B>, B>,
{
    pub fn new(
        model: HorseClassifier<B>,
        optimizer: O,
        loader: BatchLoader,
        image_size: usize,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            optimizer,
            loader,
            batcher: HorseBatcher::new(image_size),
            loss: CrossEntropyLossConfig::new().init(&device),
            device,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn model(&self) -> &HorseClassifier<B> {
        &self.model
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// One pass over `order` (positions within `provider`) with parameter updates
    pub fn train_epoch(&mut self, provider: &SampleProvider, order: &[usize], lr: f64) -> Result<PhaseMetrics> {
        let progress = phase_progress(self.show_progress, self.loader.num_batches(order.len()), "train");
        let optimizer = &mut self.optimizer;
        let batcher = &self.batcher;
        let loss_fn = &self.loss;
        let device = &self.device;

        let (model, metrics) = self.loader.try_fold(
            provider,
            order,
            (self.model.clone(), PhaseMetrics::new()),
            |(model, mut metrics), items| {
                let batch: HorseBatch<B> = batcher.batch(items, device);
                let batch_size = batch.len();

                // Gradients are produced fresh by each backward pass
                let logits = model.forward(batch.images);
                let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
                let correct = count_correct(logits, batch.targets);
                let loss_value: f64 = loss.clone().into_scalar().elem();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                let model = optimizer.step(lr, model, grads);

                metrics.update(loss_value, correct, batch_size);
                debug!("train batch: loss {:.4}, {}/{} correct", loss_value, correct, batch_size);
                progress.inc(1);

                Ok((model, metrics))
            },
        )?;

        progress.finish_and_clear();
        self.model = model;
        Ok(metrics)
    }

    /// Evaluation pass: inference-mode model, no gradients, no updates
    pub fn validate_epoch(&self, provider: &SampleProvider) -> Result<PhaseMetrics> {
        let model = self.model.valid();
        let (metrics, _) = evaluate(&model, provider, &self.loader, &self.device, self.show_progress)?;
        Ok(metrics)
    }
}

/// Loss, accuracy and confusion matrix of `model` over a whole partition, in partition order
pub fn evaluate<B: Backend>(
    model: &HorseClassifier<B>,
    provider: &SampleProvider,
    loader: &BatchLoader,
    device: &B::Device,
    show_progress: bool,
) -> Result<(PhaseMetrics, ConfusionMatrix)> {
    let batcher = HorseBatcher::new(provider.transform().image_size() as usize);
    let loss_fn: CrossEntropyLoss<B> = CrossEntropyLossConfig::new().init(device);
    let order: Vec<usize> = (0..provider.len()).collect();
    let progress = phase_progress(show_progress, loader.num_batches(order.len()), "val");

    let init = (PhaseMetrics::new(), ConfusionMatrix::new(model.num_classes()));
    let result = loader.try_fold(provider, &order, init, |(mut metrics, mut confusion), items| {
        let batch: HorseBatch<B> = batcher.batch(items, device);
        let batch_size = batch.len();

        let logits = model.forward(batch.images);
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();

        let predicted = to_indices(logits.argmax(1).flatten::<1>(0, 1))?;
        let actual = to_indices(batch.targets)?;
        let correct = predicted.iter().zip(&actual).filter(|(p, a)| p == a).count();
        for (&a, &p) in actual.iter().zip(&predicted) {
            confusion.add(a, p);
        }

        metrics.update(loss, correct, batch_size);
        progress.inc(1);
        Ok((metrics, confusion))
    })?;

    progress.finish_and_clear();
    Ok(result)
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions = logits.argmax(1).flatten::<1>(0, 1);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

fn to_indices<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values: Vec<i64> = tensor
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| EquiVisionError::Serialization(format!("{:?}", e)))?;
    Ok(values.into_iter().map(|v| v as usize).collect())
}

fn phase_progress(show: bool, batches: usize, phase: &str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(batches as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "  {msg:>5} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({per_sec})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(phase.to_string());
    pb
}

/// Run a full training session on `device`.
///
/// Builds the catalog, splits it once, trains for `num_epochs`, writes the
/// checkpoint whenever validation accuracy strictly improves and returns the
/// best weights.
pub fn run_training<B: AutodiffBackend>(config: &TrainingConfig, device: B::Device) -> Result<TrainingOutcome<B>> {
    config.validate()?;
    let start = Instant::now();

    let catalog = ClassCatalog::build(&config.data_dir)?;
    if catalog.num_classes() == 0 {
        return Err(EquiVisionError::Config(format!(
            "no classes in {:?}",
            catalog.root_dir().join(crate::dataset::MANIFEST_FILE)
        )));
    }

    let split = split(catalog.len(), config.train_ratio, config.seed);
    if split.train.is_empty() {
        return Err(EquiVisionError::EmptyPartition(format!(
            "training partition is empty ({} samples, train_ratio {})",
            catalog.len(),
            config.train_ratio
        )));
    }
    if split.validation.is_empty() {
        warn!("Validation partition is empty; validation accuracy will stay at 0");
    }

    let image_size = config.image_size;
    let train_provider = SampleProvider::new(catalog.samples(), split.train, Transform::training(image_size))?;
    let val_provider = SampleProvider::new(catalog.samples(), split.validation, Transform::evaluation(image_size))?;
    info!(
        "Dataset: {} classes | {} train / {} val samples",
        catalog.num_classes(),
        train_provider.len(),
        val_provider.len()
    );

    let model = HorseClassifier::<B>::new(&config.model, catalog.num_classes(), &device)?;
    let loader = BatchLoader::new(config.num_workers, config.batch_size, config.prefetch_batches)?;
    info!(
        "Model: {} | batch size {} | lr {} | {} loader workers",
        model.architecture(),
        config.batch_size,
        config.learning_rate,
        loader.num_workers()
    );

    let mut trainer = Trainer::new(model, config.optimizer().init(), loader, image_size as usize, device)
        .with_progress(config.show_progress);
    let mut scheduler = LearningRateScheduler::new(config.scheduler.clone(), config.learning_rate);
    let mut checkpoints = CheckpointWriter::new(&config.output_dir, &config.checkpoint_name)?;
    let mut run = TrainingRun::new(trainer.model().clone());
    let mut logger = TrainingLogger::new(config.num_epochs);
    let mut shuffle_rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));

    for epoch in 0..config.num_epochs {
        logger.start_epoch(epoch);
        let lr = scheduler.get_lr();

        let mut order: Vec<usize> = (0..train_provider.len()).collect();
        order.shuffle(&mut shuffle_rng);
        let train = trainer.train_epoch(&train_provider, &order, lr)?;
        logger.log_phase("train", train.loss(), train.accuracy());

        scheduler.step();

        let val = trainer.validate_epoch(&val_provider)?;
        logger.log_phase("val", val.loss(), val.accuracy());

        let record = EpochRecord {
            epoch,
            learning_rate: lr,
            train,
            val,
            improved: false,
        };

        if run.observe(record, trainer.model()) {
            logger.log_new_best(val.accuracy());
            let metadata = CheckpointMetadata {
                epoch,
                val_accuracy: val.accuracy(),
                val_loss: val.loss(),
                learning_rate: lr,
                timestamp: chrono::Utc::now().to_rfc3339(),
                num_classes: catalog.num_classes(),
                classes: catalog.classes().to_vec(),
                architecture: config.model.architecture,
                dropout: config.model.effective_dropout(),
                image_size,
                seed: config.seed,
                train_ratio: config.train_ratio,
            };
            checkpoints.write(trainer.model(), &metadata)?;
        }

        logger.end_epoch(scheduler.get_lr());
    }

    logger.log_complete(run.best_accuracy);

    let best_accuracy = run.best_accuracy;
    let best_epoch = run.best_epoch;
    let history = std::mem::take(&mut run.history);

    Ok(TrainingOutcome {
        model: run.into_best_model(),
        classes: catalog.classes().to_vec(),
        best_accuracy,
        best_epoch,
        history,
        checkpoint_path: checkpoints.weights_path(),
        checkpoint_writes: checkpoints.writes(),
        train_samples: train_provider.len(),
        val_samples: val_provider.len(),
        elapsed: start.elapsed(),
    })
}
