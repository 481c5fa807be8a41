//! Preview-layer to device coordinate conversion.

use crate::types::Point;

/// Size and orientation of the on-screen preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewGeometry {
    pub width: f64,
    pub height: f64,
    /// Clockwise rotation applied to the sensor image, in degrees.
    pub rotation_angle: f64,
    /// Front cameras are previewed mirrored.
    pub mirrored: bool,
}

impl Default for PreviewGeometry {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            rotation_angle: 0.0,
            mirrored: false,
        }
    }
}

impl PreviewGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Convert a tap in preview coordinates to the device's point of interest.
    ///
    /// Device points are normalised to the sensor's landscape frame, with
    /// `(0, 0)` at the top-left and `(1, 1)` at the bottom-right.
    pub fn device_point(&self, tap: Point) -> Point {
        let mut u = normalise(tap.x, self.width);
        let v = normalise(tap.y, self.height);
        if self.mirrored {
            u = 1.0 - u;
        }

        match quarter_turns(self.rotation_angle) {
            1 => Point::new(v, 1.0 - u),
            2 => Point::new(1.0 - u, 1.0 - v),
            3 => Point::new(1.0 - v, u),
            _ => Point::new(u, v),
        }
    }
}

fn normalise(value: f64, extent: f64) -> f64 {
    if extent <= 0.0 || !value.is_finite() {
        return 0.5;
    }
    (value / extent).clamp(0.0, 1.0)
}

fn quarter_turns(angle: f64) -> u8 {
    if !angle.is_finite() {
        return 0;
    }
    ((angle / 90.0).round() as i64).rem_euclid(4) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    #[test]
    fn test_center_is_invariant() {
        for angle in [0.0, 90.0, 180.0, 270.0] {
            for mirrored in [false, true] {
                let geometry = PreviewGeometry {
                    width: 390.0,
                    height: 844.0,
                    rotation_angle: angle,
                    mirrored,
                };
                assert!(close(
                    geometry.device_point(Point::new(195.0, 422.0)),
                    Point::CENTER
                ));
            }
        }
    }

    #[test]
    fn test_landscape_is_identity() {
        let geometry = PreviewGeometry::new(800.0, 600.0);
        assert!(close(
            geometry.device_point(Point::new(200.0, 150.0)),
            Point::new(0.25, 0.25)
        ));
    }

    #[test]
    fn test_portrait_top_left_maps_to_sensor_bottom_left() {
        let geometry = PreviewGeometry {
            rotation_angle: 90.0,
            ..PreviewGeometry::new(400.0, 800.0)
        };
        assert!(close(
            geometry.device_point(Point::new(0.0, 0.0)),
            Point::new(0.0, 1.0)
        ));
        assert!(close(
            geometry.device_point(Point::new(400.0, 0.0)),
            Point::new(0.0, 0.0)
        ));
    }

    #[test]
    fn test_mirroring_flips_horizontal_axis() {
        let geometry = PreviewGeometry {
            mirrored: true,
            ..PreviewGeometry::new(100.0, 100.0)
        };
        assert!(close(
            geometry.device_point(Point::new(10.0, 30.0)),
            Point::new(0.9, 0.3)
        ));
    }

    #[test]
    fn test_out_of_bounds_tap_is_clamped() {
        let geometry = PreviewGeometry::new(100.0, 100.0);
        let point = geometry.device_point(Point::new(-20.0, 250.0));
        assert!(close(point, Point::new(0.0, 1.0)));
    }

    #[test]
    fn test_negative_angle_normalises() {
        let geometry = PreviewGeometry {
            rotation_angle: -90.0,
            ..PreviewGeometry::new(100.0, 100.0)
        };
        let expected = PreviewGeometry {
            rotation_angle: 270.0,
            ..PreviewGeometry::new(100.0, 100.0)
        };
        let tap = Point::new(20.0, 70.0);
        assert!(close(geometry.device_point(tap), expected.device_point(tap)));
    }
}
