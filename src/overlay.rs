//! Host-facing entry point tying the loops, the camera and the markers to a
//! drawing surface's lifecycle.
//!
//! The host forwards surface and pause/resume events; the overlay makes sure
//! the render loop is joined before a new one starts and the fusion worker is
//! drained before it is recreated.

use crate::camera::{CameraController, CameraState, CaptureDevice};
use crate::config::OverlayConfig;
use crate::error::ArError;
use crate::fusion::{SensorFusion, SensorSlots, Sources, StartError};
use crate::geo::GeomagneticModel;
use crate::marker::Marker;
use crate::params::{
    Key, ParameterBus, SubscriptionId, FIELD_OF_VIEW, FRAME_DELAY, GRAVITY_FILTER_COEFFICIENT,
    MAGNETIC_FILTER_COEFFICIENT, POSITION_READ_INTERVAL,
};
use crate::render::{DrawingSurface, MarkerHost, RenderLoop};
use crate::slot::SharedSlot;
use crate::transform::Transform;
use crate::types::{FieldOfView, Fix, Status, SurfaceGeometry};
use crate::Result;
use crossbeam_utils::atomic::AtomicCell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// The marker collection plus everything the render loop reads each frame.
pub struct MarkerLayer {
    bus: Arc<ParameterBus>,
    markers: Mutex<Vec<Arc<dyn Marker>>>,
    sensors: Arc<SensorSlots>,
    status: SharedSlot<Status>,
    field_of_view: Arc<SharedSlot<FieldOfView>>,
    geometry: AtomicCell<SurfaceGeometry>,
    field_of_view_sub: Mutex<Option<SubscriptionId>>,
}

impl MarkerLayer {
    pub fn new(bus: Arc<ParameterBus>, sensors: Arc<SensorSlots>) -> Self {
        Self {
            bus,
            markers: Mutex::new(Vec::new()),
            sensors,
            status: SharedSlot::new(),
            field_of_view: Arc::new(SharedSlot::new()),
            geometry: AtomicCell::new(SurfaceGeometry::default()),
            field_of_view_sub: Mutex::new(None),
        }
    }

    fn markers(&self) -> MutexGuard<'_, Vec<Arc<dyn Marker>>> {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn copy_markers(&self) -> Vec<Arc<dyn Marker>> {
        self.markers().clone()
    }

    pub fn add(&self, marker: Arc<dyn Marker>) {
        self.markers().push(marker);
    }

    /// Remove this exact marker (by identity, not id).
    pub fn remove(&self, marker: &Arc<dyn Marker>) -> bool {
        let mut markers = self.markers();
        match markers.iter().position(|m| Arc::ptr_eq(m, marker)) {
            Some(index) => {
                markers.remove(index);
                true
            }
            None => false,
        }
    }

    /// First marker with this id, in insertion order.
    pub fn find_by_id(&self, id: &str) -> Option<Arc<dyn Marker>> {
        self.copy_markers().into_iter().find(|m| m.id() == id)
    }

    pub fn clear(&self) {
        self.markers().clear();
    }

    pub fn len(&self) -> usize {
        self.markers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Arc<dyn Marker>> {
        self.markers().get(index).cloned()
    }

    /// Topmost marker under the point: the last drawn one wins.
    pub fn touched(&self, x: f64, y: f64) -> Option<Arc<dyn Marker>> {
        self.copy_markers()
            .into_iter()
            .rev()
            .find(|m| m.hit_test(x, y))
    }

    pub fn status(&self) -> Status {
        self.status.get().unwrap_or_default()
    }

    pub fn location(&self) -> Option<Fix> {
        self.sensors.fix.get()
    }

    pub fn set_geometry(&self, geometry: SurfaceGeometry) {
        self.geometry.store(geometry);
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry.load()
    }

    fn watch_field_of_view(&self) {
        let mut sub = self
            .field_of_view_sub
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sub.is_some() {
            return;
        }
        let slot = Arc::clone(&self.field_of_view);
        match self
            .bus
            .subscribe(FIELD_OF_VIEW, move |_, new, _| slot.set(new))
        {
            Ok(id) => *sub = Some(id),
            Err(e) => {
                log::warn!("Cannot follow field of view: {}", e);
                return;
            }
        }
        match self.bus.get(FIELD_OF_VIEW) {
            Ok(fov) => self.field_of_view.set(fov),
            Err(e) => log::warn!("Cannot read field of view: {}", e),
        }
    }
}

impl MarkerHost for MarkerLayer {
    fn snapshot(&self, into: &mut Vec<Arc<dyn Marker>>) {
        let markers = self.markers();
        into.clear();
        into.extend(markers.iter().cloned());
    }

    fn refresh_projection(&self, projection: &mut Transform) {
        self.watch_field_of_view();
        let fov = self.field_of_view.get().unwrap_or(FieldOfView::NONE);
        projection.calibrate(self.geometry.load(), fov);

        let status = projection.refresh(
            self.sensors.gravity.get(),
            self.sensors.magnetic.get(),
            self.sensors.fix.get(),
            self.sensors.field.get(),
        );
        if self.status.replace(Some(status)) != Some(status) {
            log::debug!("Overlay status: {}", status.decode());
        }
    }

    fn release_subscriptions(&self) {
        let id = self
            .field_of_view_sub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.bus.unsubscribe(FIELD_OF_VIEW, id);
        }
    }
}

/// The overlay kernel: parameters, markers, camera and both worker loops.
pub struct Overlay {
    config: OverlayConfig,
    bus: Arc<ParameterBus>,
    layer: Arc<MarkerLayer>,
    sensors: Arc<SensorSlots>,
    model: Arc<dyn GeomagneticModel>,
    sources: Option<Sources>,
    camera: Option<CameraController>,
    surface: Option<Arc<dyn DrawingSurface>>,
    render: Option<RenderLoop>,
    fusion: Option<SensorFusion>,
}

impl Overlay {
    /// Build an overlay with parameters seeded from `config`. Nothing runs
    /// until a surface is created.
    ///
    /// Without a camera the host publishes the field of view itself through
    /// [`set_field_of_view`](Self::set_field_of_view).
    pub fn new(
        config: OverlayConfig,
        sources: Sources,
        model: Arc<dyn GeomagneticModel>,
        camera: Option<Box<dyn CaptureDevice>>,
    ) -> Result<Self> {
        let bus = Arc::new(ParameterBus::new());
        config.seed(&bus)?;
        let sensors = Arc::new(SensorSlots::default());
        let layer = Arc::new(MarkerLayer::new(bus.clone(), sensors.clone()));
        let camera = camera.map(|device| CameraController::new(device, bus.clone()));

        Ok(Self {
            config,
            bus,
            layer,
            sensors,
            model,
            sources: Some(sources),
            camera,
            surface: None,
            render: None,
            fusion: None,
        })
    }

    pub fn bus(&self) -> &Arc<ParameterBus> {
        &self.bus
    }

    pub fn layer(&self) -> &Arc<MarkerLayer> {
        &self.layer
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// True while both loops are up.
    pub fn is_running(&self) -> bool {
        self.fusion.is_some() && self.render.as_ref().is_some_and(RenderLoop::is_running)
    }

    pub fn camera_state(&self) -> Option<CameraState> {
        self.camera.as_ref().map(CameraController::state)
    }

    // Lifecycle

    pub fn surface_created(
        &mut self,
        surface: Arc<dyn DrawingSurface>,
        geometry: SurfaceGeometry,
    ) -> Result<()> {
        log::info!(
            "Surface created: {}x{} rot={}",
            geometry.width,
            geometry.height,
            geometry.rotation.degrees()
        );
        self.stop_loops();
        self.surface = Some(surface);
        self.layer.set_geometry(geometry);
        self.start_camera(Some(geometry));
        self.start_loops()
    }

    pub fn surface_changed(&mut self, geometry: SurfaceGeometry) -> Result<()> {
        log::info!(
            "Surface changed: {}x{} rot={}",
            geometry.width,
            geometry.height,
            geometry.rotation.degrees()
        );
        self.stop_loops();
        self.layer.set_geometry(geometry);
        if let Some(camera) = self.camera.as_mut() {
            camera.stop_preview(true);
        }
        self.start_camera(Some(geometry));
        self.start_loops()
    }

    pub fn surface_destroyed(&mut self) {
        log::info!("Surface destroyed");
        self.stop_loops();
        if let Some(camera) = self.camera.as_mut() {
            camera.release();
        }
        self.surface = None;
    }

    pub fn pause(&mut self) {
        log::info!("Overlay paused");
        self.stop_loops();
        let keep_locked = self.config.lock_camera_on_pause;
        if let Some(camera) = self.camera.as_mut() {
            camera.stop_preview(keep_locked);
        }
    }

    /// Restart on the current surface, if there is one.
    pub fn resume(&mut self) -> Result<()> {
        if self.surface.is_none() {
            return Ok(());
        }
        log::info!("Overlay resumed");
        self.start_camera(None);
        self.start_loops()
    }

    /// Camera failures are not retried; the next lifecycle event tries again.
    fn start_camera(&mut self, geometry: Option<SurfaceGeometry>) {
        if let Some(camera) = self.camera.as_mut() {
            if let Err(e) = camera.start_preview(geometry) {
                log::warn!("Camera unavailable, overlay runs without preview: {}", e);
            }
        }
    }

    /// Any running loops are joined first, so at most one render loop draws.
    fn start_loops(&mut self) -> Result<()> {
        self.stop_loops();
        let Some(surface) = self.surface.clone() else {
            return Ok(());
        };
        let host: Arc<dyn MarkerHost> = self.layer.clone();
        self.render = Some(RenderLoop::start(self.bus.clone(), host, surface)?);

        let Some(sources) = self.sources.take() else {
            log::warn!("Sensor sources were lost; running without fusion");
            return Ok(());
        };
        match SensorFusion::start(
            self.bus.clone(),
            self.sensors.clone(),
            sources,
            self.model.clone(),
        ) {
            Ok(fusion) => {
                self.fusion = Some(fusion);
                Ok(())
            }
            Err(StartError { error, sources }) => {
                self.sources = sources;
                self.stop_loops();
                Err(error)
            }
        }
    }

    fn stop_loops(&mut self) {
        if let Some(render) = self.render.take() {
            render.stop();
        }
        if let Some(fusion) = self.fusion.take() {
            self.sources = fusion.stop();
        }
    }

    // Markers

    pub fn add_marker(&self, marker: Arc<dyn Marker>) {
        self.layer.add(marker);
    }

    pub fn remove_marker(&self, marker: &Arc<dyn Marker>) -> bool {
        self.layer.remove(marker)
    }

    pub fn find_by_id(&self, id: &str) -> Option<Arc<dyn Marker>> {
        self.layer.find_by_id(id)
    }

    pub fn clear_markers(&self) {
        self.layer.clear();
    }

    pub fn marker_count(&self) -> usize {
        self.layer.len()
    }

    pub fn marker_at(&self, index: usize) -> Option<Arc<dyn Marker>> {
        self.layer.get(index)
    }

    pub fn touched_marker(&self, x: f64, y: f64) -> Option<Arc<dyn Marker>> {
        self.layer.touched(x, y)
    }

    // Status

    pub fn status(&self) -> Status {
        self.layer.status()
    }

    pub fn decode_status(status: Status) -> String {
        status.decode()
    }

    /// Copy of the last accepted fix.
    pub fn location(&self) -> Option<Fix> {
        self.layer.location()
    }

    // Runtime parameters

    pub fn gravity_filter(&self) -> Result<f32> {
        self.bus.get(GRAVITY_FILTER_COEFFICIENT)
    }

    pub fn set_gravity_filter(&self, coefficient: f32) -> Result<()> {
        self.set_coefficient(GRAVITY_FILTER_COEFFICIENT, coefficient)
    }

    pub fn magnetic_filter(&self) -> Result<f32> {
        self.bus.get(MAGNETIC_FILTER_COEFFICIENT)
    }

    pub fn set_magnetic_filter(&self, coefficient: f32) -> Result<()> {
        self.set_coefficient(MAGNETIC_FILTER_COEFFICIENT, coefficient)
    }

    fn set_coefficient(&self, key: Key<f32>, coefficient: f32) -> Result<()> {
        if !(0.0..1.0).contains(&coefficient) {
            return Err(ArError::InvalidParameter {
                key: key.name(),
                reason: format!("{} is outside [0, 1)", coefficient),
            });
        }
        self.bus.set(key, coefficient)
    }

    pub fn frame_delay(&self) -> Result<Duration> {
        self.bus.get(FRAME_DELAY)
    }

    pub fn set_frame_delay(&self, delay: Duration) -> Result<()> {
        self.bus.set(FRAME_DELAY, delay)
    }

    pub fn position_interval(&self) -> Result<Duration> {
        self.bus.get(POSITION_READ_INTERVAL)
    }

    pub fn set_position_interval(&self, interval: Duration) -> Result<()> {
        self.bus.set(POSITION_READ_INTERVAL, interval)
    }

    pub fn field_of_view(&self) -> Result<FieldOfView> {
        self.bus.get(FIELD_OF_VIEW)
    }

    /// Publish the field of view directly, for hosts without a managed camera.
    pub fn set_field_of_view(&self, fov: FieldOfView) -> Result<()> {
        self.bus.set(FIELD_OF_VIEW, fov)
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.stop_loops();
        if let Some(camera) = self.camera.as_mut() {
            camera.release();
        }
    }
}
