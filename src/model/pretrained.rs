//! Import of torchvision ImageNet weights into the backbones
//!
//! State dict keys are remapped onto our field names; the torchvision
//! classifier (`classifier.*` / `fc.*`) has no counterpart in the backbone
//! structs and is left out of the import, so the head always starts fresh.
//!
//! Without an explicit file, the torchvision checkpoint is downloaded once into
//! the user cache directory and reused from there.

use std::fs;
use std::path::{Path, PathBuf};

use burn::data::network::downloader;
use burn::module::Module;
use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::{debug, info};

use crate::model::config::ModelArchitecture;
use crate::model::efficientnet::{EfficientNetB0, EfficientNetB0Record, STAGES};
use crate::model::resnet::{ResNet18, ResNet18Record};
use crate::utils::error::{EquiVisionError, Result};

/// torchvision IMAGENET1K_V1 checkpoint
pub fn weights_url(architecture: ModelArchitecture) -> &'static str {
    match architecture {
        ModelArchitecture::EfficientNetB0 => {
            "https://download.pytorch.org/models/efficientnet_b0_rwightman-7f5810bc.pth"
        }
        ModelArchitecture::ResNet18 => "https://download.pytorch.org/models/resnet18-f37072fd.pth",
    }
}

/// File name of the checkpoint inside the cache
pub fn weights_file_name(architecture: ModelArchitecture) -> &'static str {
    let url = weights_url(architecture);
    url.rsplit('/').next().unwrap_or(url)
}

/// `<user cache>/equivision/weights`, or under the temp dir when there is no cache dir
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("equivision")
        .join("weights")
}

/// ImageNet weights for `architecture` in `cache_dir`, downloaded on first use
pub fn cached_weights(architecture: ModelArchitecture, cache_dir: &Path) -> Result<PathBuf> {
    let path = cache_dir.join(weights_file_name(architecture));
    if path.is_file() {
        debug!("Using cached {} weights {:?}", architecture, path);
        return Ok(path);
    }

    fs::create_dir_all(cache_dir)?;
    let url = weights_url(architecture);
    info!("Downloading {} ImageNet weights from {}", architecture, url);

    // the downloader panics on network errors
    let bytes = std::panic::catch_unwind(|| {
        downloader::download_file_as_bytes(url, weights_file_name(architecture))
    })
    .map_err(|_| EquiVisionError::PretrainedWeights(format!("download of {} failed", url)))?;

    let partial = path.with_extension("partial");
    fs::write(&partial, bytes)?;
    fs::rename(&partial, &path)?;
    Ok(path)
}

/// `(pattern, replacement)` pairs mapping torchvision `efficientnet_b0` keys
pub fn efficientnet_key_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![
        (r"^features\.0\.0\.".to_string(), "stem.conv.".to_string()),
        (r"^features\.0\.1\.".to_string(), "stem.bn.".to_string()),
        (format!(r"^features\.{}\.0\.", STAGES.len() + 1), "top.conv.".to_string()),
        (format!(r"^features\.{}\.1\.", STAGES.len() + 1), "top.bn.".to_string()),
    ];

    for (stage, spec) in STAGES.iter().enumerate() {
        let parts: &[&str] = if spec.expand_ratio == 1 {
            &["depthwise", "se", "project"]
        } else {
            &["expand", "depthwise", "se", "project"]
        };

        for (block, part) in parts.iter().enumerate() {
            let prefix = format!(r"^features\.{}\.(\d+)\.block\.{}\.", stage + 1, block);
            let target = format!("stages.{}.${{1}}.{}.", stage, part);

            if *part == "se" {
                remaps.push((prefix, target));
            } else {
                remaps.push((format!("{}0\\.", prefix), format!("{}conv.", target)));
                remaps.push((format!("{}1\\.", prefix), format!("{}bn.", target)));
            }
        }
    }

    remaps
}

/// `(pattern, replacement)` pairs mapping torchvision `resnet18` keys
pub fn resnet_key_remaps() -> Vec<(String, String)> {
    vec![
        (r"\.downsample\.0\.".to_string(), ".downsample.conv.".to_string()),
        (r"\.downsample\.1\.".to_string(), ".downsample.bn.".to_string()),
    ]
}

fn load_args(path: &Path, remaps: Vec<(String, String)>) -> Result<LoadArgs> {
    if !path.is_file() {
        return Err(EquiVisionError::PretrainedWeights(format!(
            "weights file not found: {:?}",
            path
        )));
    }

    Ok(remaps
        .into_iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(&pattern, &replacement)
        }))
}

pub fn load_efficientnet<B: Backend>(
    backbone: EfficientNetB0<B>,
    path: &Path,
    device: &B::Device,
) -> Result<EfficientNetB0<B>> {
    let args = load_args(path, efficientnet_key_remaps())?;
    let record: EfficientNetB0Record<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|e| EquiVisionError::PretrainedWeights(format!("{:?}: {}", path, e)))?;

    info!("Loaded EfficientNet-B0 backbone weights from {:?}", path);
    Ok(backbone.load_record(record))
}

pub fn load_resnet<B: Backend>(backbone: ResNet18<B>, path: &Path, device: &B::Device) -> Result<ResNet18<B>> {
    let args = load_args(path, resnet_key_remaps())?;
    let record: ResNet18Record<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|e| EquiVisionError::PretrainedWeights(format!("{:?}: {}", path, e)))?;

    info!("Loaded ResNet-18 backbone weights from {:?}", path);
    Ok(backbone.load_record(record))
}
