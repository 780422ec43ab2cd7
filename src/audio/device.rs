// DeviceManager - input-device enumeration and fallback ordering
//
// Calibration retries may escalate to an alternate microphone; this module
// supplies the ordered candidate list: explicit preference first, then the
// system default, then every remaining input, with already-tried devices
// excluded.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// An input device usable for switch capture
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceCandidate {
    pub name: String,
    pub is_default: bool,
}

/// Enumeration and fallback-ordering of host input devices
pub struct DeviceManager;

impl DeviceManager {
    /// List every named input device, system default first
    pub fn list_input_devices() -> Vec<DeviceCandidate> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut candidates = Vec::new();
        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name() {
                    let is_default = Some(&name) == default_name.as_ref();
                    candidates.push(DeviceCandidate { name, is_default });
                }
            }
        }
        order_candidates(candidates, None, &[])
    }

    /// Fallback list for calibration retries
    ///
    /// # Arguments
    /// * `preferred` - Configured device override, listed first when present
    /// * `tried` - Device names already attempted this session, excluded
    pub fn fallback_candidates(preferred: Option<&str>, tried: &[String]) -> Vec<DeviceCandidate> {
        order_candidates(Self::list_input_devices(), preferred, tried)
    }

    /// Resolve a device by name, or the system default when `name` is None
    pub fn find_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match name {
            None => host.default_input_device().ok_or(AudioError::NoInputDevice),
            Some(wanted) => {
                let devices = host.input_devices().map_err(|e| {
                    AudioError::StreamOpenFailed {
                        reason: format!("device enumeration failed: {}", e),
                    }
                })?;
                for device in devices {
                    if device.name().map(|n| n == wanted).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(AudioError::DeviceNotFound {
                    name: wanted.to_string(),
                })
            }
        }
    }
}

/// Order candidates: preferred first, then default, then the rest; `tried`
/// names are dropped. Pure so the ordering rules stay testable without
/// audio hardware.
fn order_candidates(
    all: Vec<DeviceCandidate>,
    preferred: Option<&str>,
    tried: &[String],
) -> Vec<DeviceCandidate> {
    let mut ordered = Vec::with_capacity(all.len());

    if let Some(wanted) = preferred {
        if let Some(candidate) = all.iter().find(|c| c.name == wanted) {
            if !tried.contains(&candidate.name) {
                ordered.push(candidate.clone());
            }
        }
    }

    for candidate in all.iter().filter(|c| c.is_default) {
        if !tried.contains(&candidate.name) && !ordered.iter().any(|c| c.name == candidate.name) {
            ordered.push(candidate.clone());
        }
    }

    for candidate in all {
        if !tried.contains(&candidate.name) && !ordered.iter().any(|c| c.name == candidate.name) {
            ordered.push(candidate);
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, is_default: bool) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            is_default,
        }
    }

    #[test]
    fn test_default_device_listed_first() {
        let all = vec![
            candidate("usb-mic", false),
            candidate("builtin", true),
            candidate("headset", false),
        ];
        let ordered = order_candidates(all, None, &[]);
        assert_eq!(ordered[0].name, "builtin");
        assert_eq!(ordered.len(), 3);
    }

    #[test]
    fn test_preferred_device_wins_over_default() {
        let all = vec![
            candidate("usb-mic", false),
            candidate("builtin", true),
            candidate("headset", false),
        ];
        let ordered = order_candidates(all, Some("headset"), &[]);
        assert_eq!(ordered[0].name, "headset");
        assert_eq!(ordered[1].name, "builtin");
    }

    #[test]
    fn test_tried_devices_are_excluded() {
        let all = vec![
            candidate("usb-mic", false),
            candidate("builtin", true),
            candidate("headset", false),
        ];
        let tried = vec!["builtin".to_string(), "headset".to_string()];
        let ordered = order_candidates(all, Some("headset"), &tried);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].name, "usb-mic");
    }

    #[test]
    fn test_exhausted_list_is_empty() {
        let all = vec![candidate("builtin", true)];
        let tried = vec!["builtin".to_string()];
        assert!(order_candidates(all, None, &tried).is_empty());
    }

    #[test]
    fn test_unknown_preferred_is_ignored() {
        let all = vec![candidate("builtin", true)];
        let ordered = order_candidates(all, Some("ghost"), &[]);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].name, "builtin");
    }
}
