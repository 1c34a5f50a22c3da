//! Backend selection
//!
//! Training prefers a CUDA device when the crate is built with the `cuda`
//! feature and an NVIDIA GPU is present; otherwise it runs on the NdArray CPU
//! backend. The choice is logged and never fails.

use burn::backend::Autodiff;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// CPU backend, always available
pub type CpuBackend = burn_ndarray::NdArray<f32>;

#[cfg(feature = "cuda")]
pub type GpuBackend = burn_cuda::Cuda;

pub type CpuTrainingBackend = Autodiff<CpuBackend>;

#[cfg(feature = "cuda")]
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

/// Where a run executes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "CPU (NdArray)"),
            ComputeDevice::Cuda(id) => write!(f, "CUDA:{}", id),
        }
    }
}

/// Pick the device for this process.
///
/// `force_cpu` skips detection entirely.
pub fn select_device(force_cpu: bool) -> ComputeDevice {
    let device = if force_cpu {
        ComputeDevice::Cpu
    } else {
        detect()
    };
    info!("Using device: {}", device);
    device
}

fn detect() -> ComputeDevice {
    let gpu = has_nvidia_gpu();

    if cfg!(feature = "cuda") {
        if gpu {
            return ComputeDevice::Cuda(0);
        }
        warn!("No NVIDIA GPU detected - falling back to CPU");
    } else if gpu {
        warn!("NVIDIA GPU detected but built without the `cuda` feature - using CPU");
    }

    ComputeDevice::Cpu
}

/// Check for an NVIDIA GPU (CUDA)
pub fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || std::env::var("CUDA_VISIBLE_DEVICES").is_ok_and(|v| !v.is_empty() && v != "-1")
            || nvidia_smi("nvidia-smi")
    }

    #[cfg(target_os = "windows")]
    {
        nvidia_smi("nvidia-smi.exe")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
fn nvidia_smi(program: &str) -> bool {
    std::process::Command::new(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
