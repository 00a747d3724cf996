//! Run the overlay headless against simulated sensors and print where the
//! markers land on a 1080x1920 portrait surface.
//!
//! Usage: cargo run --example simulate
//! Set RUST_LOG=debug to follow fixes, parameters and status changes.

use arlens::{
    Canvas, CaptureDevice, DipoleModel, DirectionMarker, DrawingSurface, FieldOfView, Fix,
    LocationMarker, Marker, MarkerImage, MotionSensors, Overlay, OverlayConfig, PositionSource,
    PreviewSize, Provider, Rotation, ScreenMarker, SensorSink, Sources, SurfaceGeometry,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const HOME: (f64, f64, f64) = (47.3769, 8.5417, 408.0);

/// Phone held upright in portrait, slowly turning clockwise.
struct TurningPhone {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MotionSensors for TurningPhone {
    fn register(&mut self, sink: SensorSink) -> bool {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        self.thread = Some(std::thread::spawn(move || {
            let mut heading: f64 = 0.0;
            while running.load(Ordering::SeqCst) {
                let h = heading.to_radians();
                sink.gravity([0.0, 9.81, 0.0]);
                sink.magnetic([-20.0 * h.sin(), -40.0, -20.0 * h.cos()]);
                heading = (heading + 0.5) % 360.0;
                std::thread::sleep(Duration::from_millis(20));
            }
        }));
        true
    }

    fn unregister(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Satellite receiver reporting the same position over and over.
struct Receiver {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PositionSource for Receiver {
    fn last_known(&self) -> Option<Fix> {
        Some(Fix::new(HOME.0, HOME.1, HOME.2, 0, Provider::Network))
    }

    fn request_updates(&mut self, interval: Duration, sink: SensorSink) {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let period = interval.max(Duration::from_millis(250));
        self.thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let fix = Fix::new(HOME.0, HOME.1, HOME.2, arlens::now_ms(), Provider::Satellite)
                    .with_accuracy(4.0);
                sink.fix(fix);
                std::thread::sleep(period);
            }
        }));
    }

    fn cancel_updates(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct SimulatedCamera;

impl CaptureDevice for SimulatedCamera {
    fn open(&mut self) -> arlens::Result<()> {
        Ok(())
    }

    fn supported_preview_sizes(&self) -> Vec<PreviewSize> {
        vec![
            PreviewSize::new(640, 480),
            PreviewSize::new(1280, 720),
            PreviewSize::new(1920, 1080),
            PreviewSize::new(1440, 1080),
        ]
    }

    fn native_field_of_view(&self) -> FieldOfView {
        FieldOfView::new(66.0, 50.0)
    }

    fn sensor_orientation(&self) -> u32 {
        90
    }

    fn configure(&mut self, size: PreviewSize, display_orientation: u32) -> arlens::Result<()> {
        println!(
            "camera: preview {}x{}, display orientation {}",
            size.width, size.height, display_orientation
        );
        Ok(())
    }

    fn start_preview(&mut self) -> arlens::Result<()> {
        Ok(())
    }

    fn stop_preview(&mut self) {}

    fn unlock(&mut self) -> arlens::Result<()> {
        Ok(())
    }

    fn reconnect(&mut self) -> arlens::Result<()> {
        Ok(())
    }

    fn release(&mut self) {}
}

struct NullCanvas;

impl Canvas for NullCanvas {
    fn clear(&mut self) {}
    fn save(&mut self) {}
    fn restore(&mut self) {}
}

#[derive(Default)]
struct HeadlessSurface {
    frames: AtomicU64,
}

impl DrawingSurface for HeadlessSurface {
    fn render(&self, paint: &mut dyn FnMut(&mut dyn Canvas)) -> bool {
        paint(&mut NullCanvas);
        self.frames.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Remembers where it was last painted.
struct Label {
    last: Arc<Mutex<Option<(f64, f64)>>>,
}

impl MarkerImage for Label {
    fn draw(&self, _canvas: &mut dyn Canvas, x: f64, y: f64, _scale_x: f64, _scale_y: f64) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some((x, y));
        }
    }

    fn width(&self) -> f64 {
        120.0
    }

    fn height(&self) -> f64 {
        40.0
    }
}

fn label() -> (Box<dyn MarkerImage>, Arc<Mutex<Option<(f64, f64)>>>) {
    let last = Arc::new(Mutex::new(None));
    (Box::new(Label { last: last.clone() }), last)
}

fn main() {
    env_logger::init();

    let sources = Sources {
        motion: Box::new(TurningPhone {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }),
        position: Box::new(Receiver {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }),
    };
    let mut config = OverlayConfig::from_env();
    if config.position_interval.is_zero() {
        config.position_interval = Duration::from_secs(1);
    }
    if config.frame_delay.is_zero() {
        config.frame_delay = Duration::from_millis(16);
    }
    let mut overlay = match Overlay::new(
        config,
        sources,
        Arc::new(DipoleModel::default()),
        Some(Box::new(SimulatedCamera)),
    ) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Failed to build overlay: {}", e);
            std::process::exit(1);
        }
    };

    let mut tracked = Vec::new();
    for (name, bearing) in [("N", 0.0), ("E", 90.0), ("S", 180.0), ("W", 270.0)] {
        let (image, last) = label();
        overlay.add_marker(Arc::new(DirectionMarker::new(name, image, bearing, 0.0)));
        tracked.push((name, last));
    }
    let (image, last) = label();
    overlay.add_marker(Arc::new(
        LocationMarker::new("tower", image, Fix::at(HOME.0 + 0.004, HOME.1 + 0.002, HOME.2 + 60.0))
            .with_scale(|distance| (300.0 / distance).clamp(0.25, 1.0)),
    ));
    tracked.push(("tower", last));

    let hud_frames = Arc::new(AtomicU64::new(0));
    let hud_counter = hud_frames.clone();
    overlay.add_marker(Arc::new(ScreenMarker::new("hud", move |_canvas, _w, _h| {
        hud_counter.fetch_add(1, Ordering::Relaxed);
    })));

    let surface = Arc::new(HeadlessSurface::default());
    let geometry = SurfaceGeometry::new(1080, 1920, Rotation::Deg0);
    if let Err(e) = overlay.surface_created(surface.clone(), geometry) {
        eprintln!("Failed to start overlay: {}", e);
        std::process::exit(1);
    }
    if let Ok(fov) = overlay.field_of_view() {
        println!("field of view: {:.1} x {:.1} deg", fov.horizontal, fov.vertical);
    }

    for tick in 0..12 {
        std::thread::sleep(Duration::from_millis(500));
        println!(
            "t={:>4}ms frames={:<6} status={}",
            (tick + 1) * 500,
            surface.frames.load(Ordering::Relaxed),
            Overlay::decode_status(overlay.status())
        );
        for (name, last) in &tracked {
            let at = last.lock().ok().and_then(|l| *l);
            let visible = |x, y| overlay.find_by_id(name).is_some_and(|m| m.hit_test(x, y));
            match at {
                Some((x, y)) if visible(x, y) => {
                    println!("    {:<6} at ({:7.1}, {:7.1})", name, x, y)
                }
                _ => println!("    {:<6} off screen", name),
            }
        }
        if tick == 5 {
            println!("-- rotating to landscape --");
            if let Err(e) = overlay.surface_changed(SurfaceGeometry::new(1920, 1080, Rotation::Deg90)) {
                eprintln!("Failed to restart overlay: {}", e);
                break;
            }
        }
    }

    overlay.surface_destroyed();
    println!(
        "\nTotal: {} frames, HUD painted {} times, {} markers",
        surface.frames.load(Ordering::Relaxed),
        hud_frames.load(Ordering::Relaxed),
        overlay.marker_count()
    );
}
