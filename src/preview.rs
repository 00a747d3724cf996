//! Camera preview resolution choice and the field of view it implies.

use crate::types::{FieldOfView, PreviewSize, Rotation, SurfaceGeometry};

/// Outcome of grading the supported preview sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewChoice {
    /// Highest-graded size.
    pub best: PreviewSize,
    /// Largest-area size, the reference for the sensor's full field of view.
    pub largest: PreviewSize,
}

/// `area / (0.05 + weight * |aspect - surface_aspect|)`, aspects as height over width.
pub fn grade(size: PreviewSize, surface_aspect: f64, weight: f64) -> f64 {
    size.area() as f64 / (0.05 + weight * (size.aspect_ratio() - surface_aspect).abs())
}

/// Pick the best preview size for a surface aspect ratio. First wins on ties.
pub fn choose_preview_size(
    sizes: &[PreviewSize],
    surface_aspect: f64,
    weight: f64,
) -> Option<PreviewChoice> {
    let mut best: Option<(PreviewSize, f64)> = None;
    let mut largest: Option<PreviewSize> = None;

    for &size in sizes {
        if size.width == 0 || size.height == 0 {
            continue;
        }
        let g = grade(size, surface_aspect, weight);
        if best.map_or(true, |(_, best_grade)| g > best_grade) {
            best = Some((size, g));
        }
        if largest.map_or(true, |l| size.area() > l.area()) {
            largest = Some(size);
        }
    }

    Some(PreviewChoice {
        best: best?.0,
        largest: largest?,
    })
}

/// `2·atan(ratio·tan(angle/2))`, degrees in and out.
pub fn scale_angle(angle_deg: f64, ratio: f64) -> f64 {
    (2.0 * (ratio * (angle_deg.to_radians() / 2.0).tan()).atan()).to_degrees()
}

/// Field of view of the chosen preview, given the native angles of the full sensor.
///
/// The dimension that was cropped relative to the largest size keeps a
/// proportionally narrower angle; the other keeps the native one.
pub fn derive_field_of_view(choice: &PreviewChoice, native: FieldOfView) -> FieldOfView {
    let (best, largest) = (choice.best, choice.largest);
    let width_share = best.width as f64 / largest.width as f64;
    let height_share = best.height as f64 / largest.height as f64;

    if width_share >= height_share {
        let height_ratio = (best.height as f64 * largest.width as f64)
            / (largest.height as f64 * best.width as f64);
        FieldOfView::new(native.horizontal, scale_angle(native.vertical, height_ratio))
    } else {
        let width_ratio = (best.width as f64 * largest.height as f64)
            / (largest.width as f64 * best.height as f64);
        FieldOfView::new(scale_angle(native.horizontal, width_ratio), native.vertical)
    }
}

/// Surface aspect ratio in the camera's (landscape) frame.
pub fn surface_aspect_ratio(geometry: SurfaceGeometry) -> f64 {
    let (width, height) = if geometry.rotation.is_portrait() {
        (geometry.height, geometry.width)
    } else {
        (geometry.width, geometry.height)
    };
    if width == 0 {
        return 0.0;
    }
    height as f64 / width as f64
}

/// Clockwise rotation to apply to the preview so it appears upright.
pub fn display_orientation(rotation: Rotation, sensor_orientation: u32) -> u32 {
    let offset = match rotation {
        Rotation::Deg0 => 0,
        Rotation::Deg90 => 270,
        Rotation::Deg180 => 180,
        Rotation::Deg270 => 90,
    };
    (offset + sensor_orientation) % 360
}

#[cfg(test)]
mod tests {
    use super::*;

    const VGA: PreviewSize = PreviewSize {
        width: 640,
        height: 480,
    };
    const FULL_HD: PreviewSize = PreviewSize {
        width: 1920,
        height: 1080,
    };

    #[test]
    fn test_prefers_matching_aspect() {
        let choice = choose_preview_size(&[VGA, FULL_HD], 1080.0 / 1920.0, 1.0).unwrap();
        assert_eq!(choice.best, FULL_HD);
        assert_eq!(choice.largest, FULL_HD);
    }

    #[test]
    fn test_zero_weight_picks_largest() {
        let choice = choose_preview_size(&[VGA, FULL_HD], 0.75, 0.0).unwrap();
        assert_eq!(choice.best, FULL_HD);
    }

    #[test]
    fn test_weight_can_beat_area() {
        let hd = PreviewSize::new(1280, 720);
        let square = PreviewSize::new(1440, 1440);
        let choice = choose_preview_size(&[square, hd], 0.5625, 1.0).unwrap();
        assert_eq!(choice.best, hd);
        assert_eq!(choice.largest, square);
        let by_area = choose_preview_size(&[square, hd], 0.5625, 0.0).unwrap();
        assert_eq!(by_area.best, square);
    }

    #[test]
    fn test_empty_sizes() {
        assert!(choose_preview_size(&[], 0.5, 1.0).is_none());
        assert!(choose_preview_size(&[PreviewSize::new(0, 480)], 0.5, 1.0).is_none());
    }

    #[test]
    fn test_same_size_keeps_native_angles() {
        let choice = PreviewChoice {
            best: FULL_HD,
            largest: FULL_HD,
        };
        let fov = derive_field_of_view(&choice, FieldOfView::new(66.0, 41.0));
        assert!((fov.horizontal - 66.0).abs() < 1e-9);
        assert!((fov.vertical - 41.0).abs() < 1e-9);
    }

    #[test]
    fn test_wide_crop_narrows_vertical() {
        let choice = PreviewChoice {
            best: PreviewSize::new(1920, 1080),
            largest: PreviewSize::new(1920, 1440),
        };
        let fov = derive_field_of_view(&choice, FieldOfView::new(66.0, 52.0));
        assert!((fov.horizontal - 66.0).abs() < 1e-9);
        let expected = scale_angle(52.0, 0.75);
        assert!((fov.vertical - expected).abs() < 1e-9);
        assert!(fov.vertical < 52.0);
    }

    #[test]
    fn test_tall_crop_narrows_horizontal() {
        let choice = PreviewChoice {
            best: PreviewSize::new(1440, 1440),
            largest: PreviewSize::new(1920, 1440),
        };
        let fov = derive_field_of_view(&choice, FieldOfView::new(66.0, 52.0));
        assert!((fov.vertical - 52.0).abs() < 1e-9);
        assert!((fov.horizontal - scale_angle(66.0, 0.75)).abs() < 1e-9);
    }

    #[test]
    fn test_scale_angle_identity() {
        assert!((scale_angle(60.0, 1.0) - 60.0).abs() < 1e-9);
        assert!(scale_angle(60.0, 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_surface_aspect_uses_landscape_frame() {
        let portrait = SurfaceGeometry::new(1080, 1920, Rotation::Deg0);
        assert!((surface_aspect_ratio(portrait) - 0.5625).abs() < 1e-12);
        let landscape = SurfaceGeometry::new(1920, 1080, Rotation::Deg90);
        assert!((surface_aspect_ratio(landscape) - 0.5625).abs() < 1e-12);
    }

    #[test]
    fn test_display_orientation() {
        assert_eq!(display_orientation(Rotation::Deg0, 90), 90);
        assert_eq!(display_orientation(Rotation::Deg90, 90), 0);
        assert_eq!(display_orientation(Rotation::Deg180, 90), 270);
        assert_eq!(display_orientation(Rotation::Deg270, 90), 180);
    }
}
