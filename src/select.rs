use crate::{
    device::DeviceDesc,
    error::{err, Action},
    Result,
};

/// Picks the device to capture from.
///
/// Preference order:
/// - the first device whose device class is video,
/// - the first device with a video-class interface (composite devices declare their class per
///   interface, so the device class alone misses most webcams),
/// - the first device in the list.
///
/// Fails only if `devices` is empty.
pub fn find_candidate(devices: &[DeviceDesc]) -> Result<&DeviceDesc> {
    for device in devices {
        log::trace!(
            "{:?} {:04x}:{:04x} class {:#04x}, {} interfaces",
            device.id(),
            device.vendor_id(),
            device.product_id(),
            device.class_code(),
            device.interfaces().len(),
        );
    }

    if let Some(device) = devices.iter().find(|dev| dev.is_video_class()) {
        log::debug!("found video device {:?}", device.id());
        return Ok(device);
    }

    if let Some(device) = devices.iter().find(|dev| dev.has_video_interface()) {
        log::debug!("found composite device with video interface {:?}", device.id());
        return Ok(device);
    }

    match devices.first() {
        Some(device) => {
            log::debug!(
                "no device advertises the video class, falling back to {:?}",
                device.id()
            );
            Ok(device)
        }
        None => {
            log::debug!("no USB devices attached");
            err("no video device found", Action::EnumeratingDevices)
        }
    }
}
