//! # arlens - sensor-anchored marker overlay engine
//!
//! Places markers over a live camera feed so they line up with the real
//! world, using gravity, magnetic and position sensors. Provides:
//! - A typed parameter bus with inline or worker-queued change notification
//! - A sensor fusion worker (low-pass filtering, fix acceptance, precision tracking)
//! - A projection engine from world positions or bearings to screen pixels
//! - A render loop drawing host-supplied markers each frame
//! - Camera preview sizing and a Stopped/Running/Unlocked camera state machine
//!
//! The host supplies the platform pieces through traits ([`MotionSensors`],
//! [`PositionSource`], [`DrawingSurface`], [`CaptureDevice`], [`Marker`]) and
//! forwards surface lifecycle events to an [`Overlay`].
//!
//! ## Quick Start
//! ```no_run
//! # fn sources() -> arlens::Sources { unimplemented!() }
//! # fn surface() -> std::sync::Arc<dyn arlens::DrawingSurface> { unimplemented!() }
//! use arlens::{DipoleModel, FieldOfView, Overlay, OverlayConfig, Rotation, SurfaceGeometry};
//! use std::sync::Arc;
//!
//! let mut overlay = Overlay::new(
//!     OverlayConfig::from_env(),
//!     sources(),
//!     Arc::new(DipoleModel::default()),
//!     None,
//! )
//! .unwrap();
//! overlay.set_field_of_view(FieldOfView::new(62.0, 48.0)).unwrap();
//! overlay
//!     .surface_created(surface(), SurfaceGeometry::new(1080, 1920, Rotation::Deg0))
//!     .unwrap();
//!
//! println!("{}", Overlay::decode_status(overlay.status()));
//! if let Some(fix) = overlay.location() {
//!     println!("at {:.5}, {:.5}", fix.latitude, fix.longitude);
//! }
//! overlay.surface_destroyed();
//! ```

pub mod camera;
pub mod config;
pub mod error;
pub mod fusion;
pub mod geo;
pub mod marker;
pub mod overlay;
pub mod params;
pub mod preview;
pub mod queue;
pub mod render;
pub mod slot;
pub mod transform;
pub mod types;

pub use camera::{CameraController, CameraState, CaptureDevice};
pub use config::OverlayConfig;
pub use error::ArError;
pub use fusion::{
    MotionSensors, PositionSource, SensorFusion, SensorSink, SensorSlots, Sources, StartError,
};
pub use geo::{DipoleModel, GeomagneticModel};
pub use marker::{Canvas, DirectionMarker, LocationMarker, Marker, MarkerImage, ScreenMarker};
pub use overlay::{MarkerLayer, Overlay};
pub use params::{Key, ParameterBus, SubscriptionId};
pub use render::{DrawingSurface, MarkerHost, RenderLoop};
pub use slot::SharedSlot;
pub use transform::{Projector, Transform};
pub use types::*;

/// Result type alias for overlay operations.
pub type Result<T> = std::result::Result<T, ArError>;
