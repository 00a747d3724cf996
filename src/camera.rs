use crate::error::ArError;
use crate::params::{ParameterBus, ASPECT_RATIO_WEIGHT, FIELD_OF_VIEW};
use crate::preview;
use crate::types::{FieldOfView, PreviewSize, SurfaceGeometry};
use crate::Result;
use std::sync::Arc;

/// Camera hardware seen by the overlay.
///
/// Errors should be reported as [`ArError::ResourceAcquisitionFailed`].
pub trait CaptureDevice: Send {
    /// Acquire the device. Called lazily before the first preview.
    fn open(&mut self) -> Result<()>;

    fn supported_preview_sizes(&self) -> Vec<PreviewSize>;

    /// Angles of the full sensor, in degrees.
    fn native_field_of_view(&self) -> FieldOfView;

    /// Mounting rotation of the sensor relative to the natural display orientation.
    fn sensor_orientation(&self) -> u32;

    fn configure(&mut self, size: PreviewSize, display_orientation: u32) -> Result<()>;

    fn start_preview(&mut self) -> Result<()>;

    fn stop_preview(&mut self);

    /// Give up exclusive ownership while keeping the handle.
    fn unlock(&mut self) -> Result<()>;

    /// Regain ownership after [`unlock`](Self::unlock).
    fn reconnect(&mut self) -> Result<()>;

    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Stopped,
    Running,
    Unlocked,
}

/// Owns the capture device and its preview state machine.
///
/// Starting the preview sizes it for the surface and publishes the resulting
/// field of view; stopping or releasing publishes `(0, 0)`.
pub struct CameraController {
    device: Box<dyn CaptureDevice>,
    opened: bool,
    state: CameraState,
    surface: Option<SurfaceGeometry>,
    bus: Arc<ParameterBus>,
}

impl CameraController {
    pub fn new(device: Box<dyn CaptureDevice>, bus: Arc<ParameterBus>) -> Self {
        Self {
            device,
            opened: false,
            state: CameraState::Stopped,
            surface: None,
            bus,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    fn ensure_open(&mut self) -> Result<()> {
        if !self.opened {
            self.device.open()?;
            self.opened = true;
            log::info!("Camera opened");
        }
        Ok(())
    }

    /// Start (or keep) the preview on `surface`, or on the last surface if `None`.
    ///
    /// On failure the controller stays in (or falls back to) `Stopped`; no retry.
    pub fn start_preview(&mut self, surface: Option<SurfaceGeometry>) -> Result<()> {
        let result = self.try_start(surface);
        if let Err(e) = &result {
            log::warn!("Camera preview start failed: {}", e);
        }
        result
    }

    fn try_start(&mut self, surface: Option<SurfaceGeometry>) -> Result<()> {
        self.ensure_open()?;

        if self.state == CameraState::Unlocked {
            self.device.reconnect()?;
            self.state = CameraState::Stopped;
        }

        if self.state == CameraState::Stopped {
            if surface.is_some() {
                self.surface = surface;
            }
            let geometry = self.surface.ok_or_else(|| {
                ArError::ResourceAcquisitionFailed("no preview surface".into())
            })?;
            self.adjust_preview(geometry)?;
            self.device.start_preview()?;
            self.state = CameraState::Running;
            log::info!("Camera preview running");
        }
        Ok(())
    }

    fn adjust_preview(&mut self, geometry: SurfaceGeometry) -> Result<()> {
        let orientation =
            preview::display_orientation(geometry.rotation, self.device.sensor_orientation());
        let weight = self.bus.get(ASPECT_RATIO_WEIGHT)? as f64;
        let sizes = self.device.supported_preview_sizes();
        let choice = preview::choose_preview_size(
            &sizes,
            preview::surface_aspect_ratio(geometry),
            weight,
        )
        .ok_or_else(|| ArError::ResourceAcquisitionFailed("no preview sizes".into()))?;

        self.device.configure(choice.best, orientation)?;
        let fov = preview::derive_field_of_view(&choice, self.device.native_field_of_view());
        log::debug!(
            "Preview {}x{} (largest {}x{}), fov=({:.2}, {:.2})",
            choice.best.width,
            choice.best.height,
            choice.largest.width,
            choice.largest.height,
            fov.horizontal,
            fov.vertical
        );
        self.bus.set(FIELD_OF_VIEW, fov)
    }

    /// Stop the preview. With `keep_locked == false` the device is also unlocked.
    pub fn stop_preview(&mut self, keep_locked: bool) {
        if self.opened {
            match self.state {
                CameraState::Running => {
                    self.device.stop_preview();
                    self.state = CameraState::Stopped;
                    if !keep_locked {
                        self.unlock();
                    }
                }
                CameraState::Stopped if !keep_locked => self.unlock(),
                _ => {}
            }
        }
        self.clear_field_of_view();
    }

    fn unlock(&mut self) {
        match self.device.unlock() {
            Ok(()) => self.state = CameraState::Unlocked,
            Err(e) => log::warn!("Camera unlock failed: {}", e),
        }
    }

    /// Release the device entirely (surface gone).
    pub fn release(&mut self) {
        if self.opened {
            if self.state == CameraState::Running {
                self.device.stop_preview();
            }
            self.device.release();
            self.opened = false;
            log::info!("Camera released");
        }
        self.state = CameraState::Stopped;
        self.clear_field_of_view();
    }

    fn clear_field_of_view(&self) {
        if let Err(e) = self.bus.set(FIELD_OF_VIEW, FieldOfView::NONE) {
            log::warn!("Failed to reset field of view: {}", e);
        }
    }
}
