use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use lumen_model::{DeviceClass, NetworkClass};

/// Latest known connection and device conditions, shared between the
/// tracker, eviction scoring and rendition selection.
#[derive(Debug)]
pub struct NetworkConditions {
    class: AtomicU8,
    device: AtomicU8,
    /// Estimated downlink in kbit/s; zero when unknown.
    downlink_kbps: AtomicU32,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::new(NetworkClass::default(), DeviceClass::default())
    }
}

impl NetworkConditions {
    pub fn new(class: NetworkClass, device: DeviceClass) -> Self {
        Self {
            class: AtomicU8::new(class.as_u8()),
            device: AtomicU8::new(device_to_u8(device)),
            downlink_kbps: AtomicU32::new(0),
        }
    }

    pub fn class(&self) -> NetworkClass {
        NetworkClass::from_u8(self.class.load(Ordering::Relaxed))
    }

    pub fn set_class(&self, class: NetworkClass) -> NetworkClass {
        NetworkClass::from_u8(self.class.swap(class.as_u8(), Ordering::Relaxed))
    }

    pub fn device(&self) -> DeviceClass {
        device_from_u8(self.device.load(Ordering::Relaxed))
    }

    pub fn set_device(&self, device: DeviceClass) {
        self.device.store(device_to_u8(device), Ordering::Relaxed);
    }

    pub fn downlink_kbps(&self) -> Option<u32> {
        match self.downlink_kbps.load(Ordering::Relaxed) {
            0 => None,
            kbps => Some(kbps),
        }
    }

    pub fn set_downlink_kbps(&self, kbps: u32) {
        self.downlink_kbps.store(kbps, Ordering::Relaxed);
    }

    /// Apply a browser-style `effectiveType` report. Unknown strings are
    /// ignored and the current class is kept.
    pub fn apply_effective_type(&self, effective: &str) -> NetworkClass {
        if let Some(class) = NetworkClass::from_effective_type(effective) {
            self.set_class(class);
        }
        self.class()
    }
}

fn device_to_u8(device: DeviceClass) -> u8 {
    match device {
        DeviceClass::Mobile => 0,
        DeviceClass::Tablet => 1,
        DeviceClass::Desktop => 2,
    }
}

fn device_from_u8(value: u8) -> DeviceClass {
    match value {
        0 => DeviceClass::Mobile,
        1 => DeviceClass::Tablet,
        _ => DeviceClass::Desktop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_type_updates_class_and_ignores_garbage() {
        let conditions = NetworkConditions::default();
        assert_eq!(conditions.class(), NetworkClass::Fast);
        assert_eq!(
            conditions.apply_effective_type("2g"),
            NetworkClass::Slow
        );
        assert_eq!(
            conditions.apply_effective_type("carrier-pigeon"),
            NetworkClass::Slow
        );
    }

    #[test]
    fn downlink_zero_means_unknown() {
        let conditions =
            NetworkConditions::new(NetworkClass::Moderate, DeviceClass::Mobile);
        assert_eq!(conditions.downlink_kbps(), None);
        conditions.set_downlink_kbps(1_500);
        assert_eq!(conditions.downlink_kbps(), Some(1_500));
        assert_eq!(conditions.device(), DeviceClass::Mobile);
    }
}
