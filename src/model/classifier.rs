//! Horse-breed classifier: pretrained backbone + replaceable linear head

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use tracing::{debug, info, warn};

use crate::model::config::{ClassifierConfig, ModelArchitecture};
use crate::model::efficientnet::EfficientNetB0;
use crate::model::pretrained;
use crate::model::resnet::ResNet18;
use crate::utils::error::{EquiVisionError, Result};

/// Recorder used for checkpoints; full precision so a reload reproduces accuracy exactly
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Feature extractor variants
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    EfficientNet(EfficientNetB0<B>),
    ResNet(ResNet18<B>),
}

impl<B: Backend> Backbone<B> {
    pub fn new(architecture: ModelArchitecture, device: &B::Device) -> Self {
        match architecture {
            ModelArchitecture::EfficientNetB0 => Backbone::EfficientNet(EfficientNetB0::new(device)),
            ModelArchitecture::ResNet18 => Backbone::ResNet(ResNet18::new(device)),
        }
    }

    /// `[batch, 3, h, w]` -> `[batch, feature_width]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::EfficientNet(model) => model.forward(input),
            Backbone::ResNet(model) => model.forward(input),
        }
    }

    pub fn architecture(&self) -> ModelArchitecture {
        match self {
            Backbone::EfficientNet(_) => ModelArchitecture::EfficientNetB0,
            Backbone::ResNet(_) => ModelArchitecture::ResNet18,
        }
    }

    fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        Ok(match self {
            Backbone::EfficientNet(model) => {
                Backbone::EfficientNet(pretrained::load_efficientnet(model, path, device)?)
            }
            Backbone::ResNet(model) => Backbone::ResNet(pretrained::load_resnet(model, path, device)?),
        })
    }
}

#[derive(Module, Debug)]
pub struct HorseClassifier<B: Backend> {
    backbone: Backbone<B>,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> HorseClassifier<B> {
    /// Build a classifier for `num_classes` breeds.
    ///
    /// With `pretrained` set, the backbone is initialised from the torchvision
    /// ImageNet state dict: `pretrained_weights` when given, otherwise the
    /// cached download. The head is always freshly initialised.
    pub fn new(config: &ClassifierConfig, num_classes: usize, device: &B::Device) -> Result<Self> {
        if num_classes == 0 {
            return Err(EquiVisionError::Config("num_classes must be > 0".into()));
        }

        let mut model = Self::skeleton(config, num_classes, device);
        if config.pretrained {
            let weights = match &config.pretrained_weights {
                Some(path) => PathBuf::from(path),
                None => pretrained::cached_weights(config.architecture, &pretrained::default_cache_dir())?,
            };
            model.backbone = model.backbone.load_pretrained(&weights, device)?;
        } else {
            if config.pretrained_weights.is_some() {
                warn!("pretrained is off; ignoring pretrained_weights");
            }
            info!("{} backbone starts from random init", config.architecture);
        }

        if config.freeze_backbone {
            info!("Backbone frozen; only the head is trained");
            model.backbone = model.backbone.no_grad();
        }

        Ok(model)
    }

    /// Swap the head for a fresh `feature_width -> num_classes` layer
    pub fn replace_head(mut self, num_classes: usize, device: &B::Device) -> Self {
        self.head = LinearConfig::new(self.feature_width(), num_classes).init(device);
        self
    }

    /// Logits `[batch, num_classes]`, no softmax
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(self.dropout.forward(features))
    }

    /// Class probabilities
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.head.weight.dims()[1]
    }

    pub fn feature_width(&self) -> usize {
        self.head.weight.dims()[0]
    }

    pub fn architecture(&self) -> ModelArchitecture {
        self.backbone.architecture()
    }

    /// Restore weights saved with [`CheckpointRecorder`].
    ///
    /// The checkpoint's backbone must be `config.architecture`, otherwise
    /// [`EquiVisionError::Checkpoint`] is returned; its head must produce
    /// `num_classes` outputs, otherwise [`EquiVisionError::ShapeMismatch`].
    ///
    /// Dropout, stochastic depth and batch norm follow the backend: on an
    /// autodiff backend they stay in training mode, so use [`Self::load_valid`]
    /// or call `valid()` on the result for inference.
    pub fn load<P: AsRef<Path>>(
        path: P,
        config: &ClassifierConfig,
        num_classes: usize,
        device: &B::Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let record = Self::read_record(path, device)?;
        Self::from_record(record, config, num_classes, device, path)
    }

    /// Like [`Self::load`], with the backbone taken from the checkpoint itself
    pub fn load_detected<P: AsRef<Path>>(path: P, num_classes: usize, device: &B::Device) -> Result<Self> {
        let path = path.as_ref();
        let record = Self::read_record(path, device)?;

        let width = record.head.weight.dims()[0];
        let architecture = ModelArchitecture::from_feature_width(width).ok_or_else(|| {
            EquiVisionError::Checkpoint(format!("{:?}: no backbone produces {} features", path, width))
        })?;
        debug!("{:?} holds a {} backbone", path, architecture);

        let config = ClassifierConfig::new()
            .with_architecture(architecture)
            .with_pretrained(false);
        Self::from_record(record, &config, num_classes, device, path)
    }

    /// Persist all parameters    /// Persist all parameters to `path` (the recorder sets the `.mpk` extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.clone()
            .save_file(path.to_path_buf(), &CheckpointRecorder::new())
            .map_err(|e| EquiVisionError::Checkpoint(format!("{:?}: {}", path, e)))
    }

    fn read_record(path: &Path, device: &B::Device) -> Result<HorseClassifierRecord<B>> {
        CheckpointRecorder::new()
            .load(path.to_path_buf(), device)
            .map_err(|e| EquiVisionError::Checkpoint(format!("{:?}: {}", path, e)))
    }

    fn from_record(
        record: HorseClassifierRecord<B>,
        config: &ClassifierConfig,
        num_classes: usize,
        device: &B::Device,
        path: &Path,
    ) -> Result<Self> {
        // the head input width identifies the backbone; a variant mismatch would panic in load_record
        let width = record.head.weight.dims()[0];
        let expected_width = config.architecture.feature_width();
        if width != expected_width {
            return Err(EquiVisionError::Checkpoint(format!(
                "{:?}: checkpoint backbone produces {} features, {} expects {}",
                path, width, config.architecture, expected_width
            )));
        }

        let found = record.head.weight.dims()[1];
        if found != num_classes {
            return Err(EquiVisionError::ShapeMismatch {
                expected: num_classes,
                found,
            });
        }

        // Every parameter comes from the checkpoint, so no pretrained import here
        let model = Self::skeleton(config, num_classes, device);
        Ok(model.load_record(record).no_grad())
    }

    /// Randomly initialised layers, nothing imported or frozen
    fn skeleton(config: &ClassifierConfig, num_classes: usize, device: &B::Device) -> Self {
        let architecture = config.architecture;
        Self {
            backbone: Backbone::new(architecture, device),
            dropout: DropoutConfig::new(config.effective_dropout()).init(),
            head: LinearConfig::new(architecture.feature_width(), num_classes).init(device),
        }
    }
}

impl<B: AutodiffBackend> HorseClassifier<B> {
    /// Load a checkpoint onto the inner backend, ready for inference
    pub fn load_valid<P: AsRef<Path>>(
        path: P,
        config: &ClassifierConfig,
        num_classes: usize,
        device: &B::Device,
    ) -> Result<HorseClassifier<B::InnerBackend>> {
        HorseClassifier::<B::InnerBackend>::load(path, config, num_classes, device)
    }
}
