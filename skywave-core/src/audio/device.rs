//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about one audio endpoint, for `--list-devices` and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
}

#[cfg(feature = "audio-cpal")]
mod cpal_impl {
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    use super::DeviceInfo;
    use crate::error::{Result, SkywaveError};

    pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let devices = host
            .input_devices()
            .map_err(|e| SkywaveError::AudioDevice(e.to_string()))?;
        Ok(collect(devices, default_name))
    }

    pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let devices = host
            .output_devices()
            .map_err(|e| SkywaveError::AudioDevice(e.to_string()))?;
        Ok(collect(devices, default_name))
    }

    fn collect(
        devices: impl Iterator<Item = cpal::Device>,
        default_name: Option<String>,
    ) -> Vec<DeviceInfo> {
        devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Audio Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo { name, is_default }
            })
            .collect()
    }

    /// Select an input device by preferred name, falling back to the
    /// system default and then the first enumerated device.
    pub fn select_input(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(wanted) = preferred {
            let found = host
                .input_devices()
                .map_err(|e| SkywaveError::AudioDevice(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
            match found {
                Some(device) => return Ok(device),
                None => warn!(preferred = wanted, "input device not found, falling back"),
            }
        }
        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }
        host.input_devices()
            .map_err(|e| SkywaveError::AudioDevice(e.to_string()))?
            .next()
            .ok_or(SkywaveError::NoDefaultInputDevice)
    }

    /// Select an output device by preferred name with the same fallback
    /// chain as input selection.
    pub fn select_output(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(wanted) = preferred {
            let found = host
                .output_devices()
                .map_err(|e| SkywaveError::AudioDevice(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
            match found {
                Some(device) => return Ok(device),
                None => warn!(preferred = wanted, "output device not found, falling back"),
            }
        }
        host.default_output_device()
            .ok_or(SkywaveError::NoDefaultOutputDevice)
    }
}

#[cfg(feature = "audio-cpal")]
pub use cpal_impl::{list_input_devices, list_output_devices, select_input, select_output};

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> crate::error::Result<Vec<DeviceInfo>> {
    Ok(Vec::new())
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> crate::error::Result<Vec<DeviceInfo>> {
    Ok(Vec::new())
}
