use crate::params::{
    ParameterBus, ASPECT_RATIO_WEIGHT, FIELD_OF_VIEW, FRAME_DELAY, GRAVITY_FILTER_COEFFICIENT,
    MAGNETIC_FILTER_COEFFICIENT, POSITION_READ_INTERVAL,
};
use crate::types::FieldOfView;
use crate::Result;
use std::time::Duration;

/// Initial values for the overlay's runtime parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayConfig {
    pub gravity_filter: f32,
    pub magnetic_filter: f32,
    pub frame_delay: Duration,
    pub position_interval: Duration,
    pub aspect_ratio_weight: f32,
    /// Keep exclusive ownership of the camera while paused.
    pub lock_camera_on_pause: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            gravity_filter: 0.95,
            magnetic_filter: 0.95,
            frame_delay: Duration::ZERO,
            position_interval: Duration::ZERO,
            aspect_ratio_weight: 1.0,
            lock_camera_on_pause: true,
        }
    }
}

impl OverlayConfig {
    /// Defaults overridden by `ARLENS_*` environment variables.
    ///
    /// Unparseable or out-of-range values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read_coefficient = |name: &str, default: f32| {
            lookup(name)
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|c| (0.0..1.0).contains(c))
                .unwrap_or(default)
        };
        let read_millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let read_bool = |name: &str, default: bool| {
            lookup(name)
                .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Some(true),
                    "0" | "false" | "no" | "off" => Some(false),
                    _ => None,
                })
                .unwrap_or(default)
        };

        Self {
            gravity_filter: read_coefficient("ARLENS_GRAVITY_FILTER", defaults.gravity_filter),
            magnetic_filter: read_coefficient("ARLENS_MAGNETIC_FILTER", defaults.magnetic_filter),
            frame_delay: read_millis("ARLENS_FRAME_DELAY_MS", defaults.frame_delay),
            position_interval: read_millis("ARLENS_POSITION_INTERVAL_MS", defaults.position_interval),
            aspect_ratio_weight: lookup("ARLENS_ASPECT_WEIGHT")
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|w| w.is_finite() && *w >= 0.0)
                .unwrap_or(defaults.aspect_ratio_weight),
            lock_camera_on_pause: read_bool("ARLENS_LOCK_CAMERA", defaults.lock_camera_on_pause),
        }
    }

    /// Create every well-known parameter on `bus` with these values.
    /// The field of view starts at `(0, 0)`.
    pub fn seed(&self, bus: &ParameterBus) -> Result<()> {
        bus.set(GRAVITY_FILTER_COEFFICIENT, self.gravity_filter)?;
        bus.set(MAGNETIC_FILTER_COEFFICIENT, self.magnetic_filter)?;
        bus.set(FRAME_DELAY, self.frame_delay)?;
        bus.set(POSITION_READ_INTERVAL, self.position_interval)?;
        bus.set(ASPECT_RATIO_WEIGHT, self.aspect_ratio_weight)?;
        bus.set(FIELD_OF_VIEW, FieldOfView::NONE)?;
        log::debug!("Parameters seeded: {:?}", self);
        Ok(())
    }
}
