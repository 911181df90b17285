//! Device selection for the conversion engine.
//!
//! The selector comes from configuration (`cpu`, `cuda`, `cuda:1`, `gpu`,
//! `mps`, `auto`). Before the engine is built it is resolved against what the
//! host actually has: asking for an accelerator that is not there degrades to
//! CPU with a warning instead of refusing to start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    /// General-purpose processor. (default)
    #[default]
    Cpu,
    /// NVIDIA GPU, optionally pinned to one device index.
    Cuda { index: Option<u32> },
    /// Apple-silicon Metal Performance Shaders.
    Mps,
    /// Let the engine pick.
    Auto,
}

impl Device {
    /// `true` for anything but [`Device::Cpu`].
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Device::Cpu)
    }

    /// Name understood by the external engine's `--device` option.
    pub fn engine_name(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda { .. } => "cuda",
            Device::Mps => "mps",
            Device::Auto => "auto",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda { index: Some(i) } => write!(f, "cuda:{i}"),
            other => f.write_str(other.engine_name()),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda { index: None }),
            "mps" => Ok(Device::Mps),
            "auto" => Ok(Device::Auto),
            other => {
                let index = other
                    .strip_prefix("cuda:")
                    .or_else(|| other.strip_prefix("gpu:"))
                    .ok_or_else(|| {
                        format!("unknown device '{other}' (expected cpu, cuda, cuda:N, mps or auto)")
                    })?;
                index
                    .parse::<u32>()
                    .map(|i| Device::Cuda { index: Some(i) })
                    .map_err(|_| format!("invalid device index in '{other}'"))
            }
        }
    }
}

/// Host capability queries used by [`resolve_device`].
pub trait AcceleratorProbe: Send + Sync {
    /// Number of CUDA devices visible to this process.
    fn cuda_devices(&self) -> usize;
    /// Whether Metal (MPS) acceleration exists on this host.
    fn mps_available(&self) -> bool;
}

/// Probes the real host: `nvidia-smi`, then the NVIDIA driver's procfs tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl AcceleratorProbe for SystemProbe {
    fn cuda_devices(&self) -> usize {
        if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
            let visible = visible.trim();
            if visible.is_empty() || visible == "-1" {
                return 0;
            }
        }

        match Command::new("nvidia-smi")
            .arg("-L")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
        {
            Ok(out) if out.status.success() => {
                let listing = String::from_utf8_lossy(&out.stdout);
                let count = count_gpu_lines(&listing);
                debug!(count, "nvidia-smi reported CUDA devices");
                count
            }
            _ => count_dir_entries(Path::new("/proc/driver/nvidia/gpus")),
        }
    }

    fn mps_available(&self) -> bool {
        cfg!(all(target_os = "macos", target_arch = "aarch64"))
    }
}

fn count_gpu_lines(listing: &str) -> usize {
    listing
        .lines()
        .filter(|l| l.trim_start().starts_with("GPU "))
        .count()
}

fn count_dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

/// Resolve a requested device against the host.
///
/// Never fails: anything the host cannot satisfy becomes [`Device::Cpu`].
/// `Auto` is resolved to the best device present.
pub fn resolve_device(requested: Device, probe: &dyn AcceleratorProbe) -> Device {
    let resolved = match requested {
        Device::Cpu => Device::Cpu,
        Device::Cuda { index } => {
            let count = probe.cuda_devices();
            match index {
                _ if count == 0 => {
                    warn!(requested = %requested, "CUDA requested but no GPU is available; falling back to CPU");
                    Device::Cpu
                }
                Some(i) if i as usize >= count => {
                    warn!(
                        requested = %requested,
                        available = count,
                        "CUDA device index out of range; falling back to CPU"
                    );
                    Device::Cpu
                }
                _ => requested,
            }
        }
        Device::Mps => {
            if probe.mps_available() {
                Device::Mps
            } else {
                warn!("MPS requested but unavailable on this host; falling back to CPU");
                Device::Cpu
            }
        }
        Device::Auto => {
            if probe.cuda_devices() > 0 {
                Device::Cuda { index: None }
            } else if probe.mps_available() {
                Device::Mps
            } else {
                Device::Cpu
            }
        }
    };

    info!(requested = %requested, resolved = %resolved, "Conversion device selected");
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        cuda: usize,
        mps: bool,
    }

    impl AcceleratorProbe for FixedProbe {
        fn cuda_devices(&self) -> usize {
            self.cuda
        }
        fn mps_available(&self) -> bool {
            self.mps
        }
    }

    #[test]
    fn parse_selectors() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda { index: None });
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::Cuda { index: None });
        assert_eq!(
            "cuda:1".parse::<Device>().unwrap(),
            Device::Cuda { index: Some(1) }
        );
        assert_eq!(" mps ".parse::<Device>().unwrap(), Device::Mps);
        assert_eq!("auto".parse::<Device>().unwrap(), Device::Auto);
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn display_round_trips_index() {
        assert_eq!(Device::Cuda { index: Some(2) }.to_string(), "cuda:2");
        assert_eq!(Device::Cuda { index: None }.to_string(), "cuda");
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }

    #[test]
    fn missing_gpu_falls_back_to_cpu() {
        let probe = FixedProbe { cuda: 0, mps: false };
        assert_eq!(
            resolve_device(Device::Cuda { index: None }, &probe),
            Device::Cpu
        );
        assert_eq!(resolve_device(Device::Mps, &probe), Device::Cpu);
        assert_eq!(resolve_device(Device::Auto, &probe), Device::Cpu);
    }

    #[test]
    fn out_of_range_index_falls_back_to_cpu() {
        let probe = FixedProbe { cuda: 1, mps: false };
        assert_eq!(
            resolve_device(Device::Cuda { index: Some(3) }, &probe),
            Device::Cpu
        );
        assert_eq!(
            resolve_device(Device::Cuda { index: Some(0) }, &probe),
            Device::Cuda { index: Some(0) }
        );
    }

    #[test]
    fn auto_prefers_cuda_then_mps() {
        let cuda = FixedProbe { cuda: 2, mps: true };
        assert_eq!(
            resolve_device(Device::Auto, &cuda),
            Device::Cuda { index: None }
        );
        let mps = FixedProbe { cuda: 0, mps: true };
        assert_eq!(resolve_device(Device::Auto, &mps), Device::Mps);
    }

    #[test]
    fn counts_nvidia_smi_listing() {
        let listing = "GPU 0: NVIDIA A100 (UUID: GPU-1)\nGPU 1: NVIDIA A100 (UUID: GPU-2)\n";
        assert_eq!(count_gpu_lines(listing), 2);
        assert_eq!(count_gpu_lines(""), 0);
    }
}
