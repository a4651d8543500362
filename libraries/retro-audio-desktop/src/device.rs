// retro-audio-desktop/src/device.rs
//
// Output device enumeration

use crate::error::{AudioOutputError, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

/// Information about an audio output device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputDeviceInfo {
    /// Device name (human-readable)
    pub name: String,

    /// Is this the host's default output?
    pub is_default: bool,

    /// Native sample rate (Hz)
    pub sample_rate: u32,

    /// Number of output channels
    pub channels: u16,

    /// Native sample format, e.g. "f32"
    pub sample_format: String,
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

fn describe(device: &cpal::Device, default_name: Option<&str>) -> Option<OutputDeviceInfo> {
    let name = device_name(device)?;
    let config = device.default_output_config().ok()?;
    Some(OutputDeviceInfo {
        is_default: default_name == Some(name.as_str()),
        name,
        sample_rate: config.sample_rate(),
        channels: config.channels(),
        sample_format: config.sample_format().to_string(),
    })
}

/// Enumerate the output devices of the default host.
///
/// Devices that cannot report an output configuration are left out. The
/// default device comes first, the rest alphabetically.
pub fn list_devices() -> Result<Vec<OutputDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| device_name(&d));

    let mut devices: Vec<OutputDeviceInfo> = host
        .output_devices()?
        .filter_map(|device| describe(&device, default_name.as_deref()))
        .collect();

    devices.sort_by(|a, b| b.is_default.cmp(&a.is_default).then(a.name.cmp(&b.name)));
    Ok(devices)
}

/// The host's default output device
pub fn default_device() -> Result<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioOutputError::DeviceNotFound)
}

/// Find an output device by exact name
pub fn find_device(name: &str) -> Result<cpal::Device> {
    cpal::default_host()
        .output_devices()?
        .find(|device| device_name(device).as_deref() == Some(name))
        .ok_or_else(|| AudioOutputError::NamedDeviceNotFound(name.to_string()))
}

pub(crate) fn name_of(device: &cpal::Device) -> String {
    device_name(device).unwrap_or_else(|| "unknown device".to_string())
}
