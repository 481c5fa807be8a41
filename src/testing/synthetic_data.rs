//! Synthetic capture payloads and device fixtures.

use crate::types::{CaptureDevice, DevicePosition, DeviceType};
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Encode a gradient test card as JPEG.
///
/// The pattern shifts with `sequence` so consecutive captures differ.
pub fn synthetic_photo_jpeg(sequence: u64, width: u32, height: u32) -> Result<Bytes, image::ImageError> {
    let base = (sequence % 256) as u8;
    let card = RgbImage::from_fn(width.max(1), height.max(1), |x, y| {
        Rgb([
            base.wrapping_add((x % 256) as u8),
            base.wrapping_add((y % 256) as u8),
            base.wrapping_add(((x + y) % 256) as u8),
        ])
    });

    let mut encoded = Cursor::new(Vec::new());
    card.write_to(&mut encoded, ImageFormat::Jpeg)?;
    Ok(Bytes::from(encoded.into_inner()))
}

/// Device lists for a phone-like rig with one webcam plugged in.
#[derive(Debug, Clone)]
pub struct FixtureDevices {
    pub cameras: Vec<CaptureDevice>,
    pub microphones: Vec<CaptureDevice>,
}

pub fn fixture_devices() -> FixtureDevices {
    FixtureDevices {
        // Discovery order is deliberately not switching order.
        cameras: vec![
            CaptureDevice::camera(
                "back-wide",
                "Back Wide Camera",
                DevicePosition::Back,
                DeviceType::WideAngle,
            ),
            CaptureDevice::camera(
                "front-truedepth",
                "Front TrueDepth Camera",
                DevicePosition::Front,
                DeviceType::TrueDepth,
            ),
            CaptureDevice::external("usb-webcam", "USB Webcam"),
            CaptureDevice::camera(
                "back-ultrawide",
                "Back Ultra Wide Camera",
                DevicePosition::Back,
                DeviceType::UltraWide,
            ),
        ],
        microphones: vec![CaptureDevice::microphone("builtin-mic", "Built-in Microphone")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_photo_is_jpeg() {
        let data = synthetic_photo_jpeg(3, 32, 24).unwrap();
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_synthetic_photos_differ_by_sequence() {
        let first = synthetic_photo_jpeg(0, 16, 16).unwrap();
        let second = synthetic_photo_jpeg(128, 16, 16).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_fixture_covers_every_position() {
        let devices = fixture_devices();
        for position in [DevicePosition::Back, DevicePosition::Front, DevicePosition::External] {
            assert!(devices.cameras.iter().any(|d| d.position == position));
        }
        assert_eq!(devices.microphones.len(), 1);
    }
}
