use std::time::{SystemTime, UNIX_EPOCH};

/// Three-axis sensor vector (device frame).
pub type Vector3 = [f64; 3];

/// Row-major 3x3 rotation matrix.
pub type Matrix3 = [[f64; 3]; 3];

/// Origin of a position fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// High-precision satellite positioning.
    Satellite,
    /// Cell/Wi-Fi based positioning.
    Network,
    /// Fix relayed from another consumer.
    Passive,
}

/// A timestamped position reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
    /// Acquisition time, milliseconds since the Unix epoch.
    pub time_ms: u64,
    pub provider: Provider,
    /// Horizontal accuracy in meters, when the source reports one.
    pub accuracy_m: Option<f64>,
    /// Precision flag maintained by the fusion loop. `None` until classified.
    pub precise: Option<bool>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, time_ms: u64, provider: Provider) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            time_ms,
            provider,
            accuracy_m: None,
            precise: None,
        }
    }

    /// Fix from a position alone, used for marker anchors.
    pub fn at(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self::new(latitude, longitude, altitude, 0, Provider::Passive)
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    /// True only once the fusion loop has classified this fix as precise.
    pub fn is_precise(&self) -> bool {
        self.precise.unwrap_or(false)
    }
}

/// Geomagnetic field at a location and time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeomagneticField {
    /// Angle from true north to magnetic north, degrees, east positive.
    pub declination_deg: f64,
    /// Dip below the horizontal, degrees, down positive.
    pub inclination_deg: f64,
    /// Total intensity in nanotesla.
    pub intensity_nt: f64,
}

/// Projected position of a world point on the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenCoordinates {
    pub x: f64,
    pub y: f64,
    /// Forward component in camera space. Non-positive means behind the viewer.
    pub depth: f64,
    /// Euclidean length of the camera-space vector.
    pub distance: f64,
}

impl ScreenCoordinates {
    pub fn is_in_front(&self) -> bool {
        self.depth > 0.0
    }
}

/// Effective horizontal and vertical field of view, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldOfView {
    pub horizontal: f64,
    pub vertical: f64,
}

impl FieldOfView {
    /// `(0, 0)`: no active camera geometry.
    pub const NONE: FieldOfView = FieldOfView {
        horizontal: 0.0,
        vertical: 0.0,
    };

    pub fn new(horizontal: f64, vertical: f64) -> Self {
        Self { horizontal, vertical }
    }

    pub fn is_active(&self) -> bool {
        self.horizontal > 0.0 && self.vertical > 0.0
    }
}

/// Display rotation relative to the device's natural orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0 = 0,
    Deg90 = 1,
    Deg180 = 2,
    Deg270 = 3,
}

impl Rotation {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn degrees(self) -> u32 {
        self.index() as u32 * 90
    }

    /// Natural orientation (portrait on phones).
    pub fn is_portrait(self) -> bool {
        matches!(self, Rotation::Deg0 | Rotation::Deg180)
    }
}

/// Size and rotation of the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceGeometry {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

impl SurfaceGeometry {
    pub fn new(width: u32, height: u32, rotation: Rotation) -> Self {
        Self { width, height, rotation }
    }
}

/// A capture resolution supported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Height over width.
    pub fn aspect_ratio(&self) -> f64 {
        self.height as f64 / self.width as f64
    }
}

bitflags::bitflags! {
    /// Health of the inputs the projection depends on. Empty means fully healthy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u32 {
        const GRAVITY_SENSOR_FAILED    = 1 << 0;
        const MAGNETIC_SENSOR_FAILED   = 1 << 1;
        const POSITION_SENSOR_FAILED   = 1 << 2;
        const GEOMAGNETIC_MODEL_FAILED = 1 << 3;
        const LOW_ACCURACY_POSITION    = 1 << 4;
    }
}

pub const STATUS_OK_STRING: &str = "OK";

const STATUS_PHRASES: [(Status, &str); 5] = [
    (Status::GRAVITY_SENSOR_FAILED, "Gravity sensor (accelerometer) failed; "),
    (Status::MAGNETIC_SENSOR_FAILED, "Magnetic field sensor (compass) failed; "),
    (Status::POSITION_SENSOR_FAILED, "Location sensor (GPS or Network) failed; "),
    (Status::GEOMAGNETIC_MODEL_FAILED, "Geomagnetic field model failed; "),
    (Status::LOW_ACCURACY_POSITION, "Using low accuracy location; "),
];

impl Status {
    /// Human-readable description, one phrase per set bit in canonical order.
    pub fn decode(self) -> String {
        if self.is_empty() {
            return STATUS_OK_STRING.to_string();
        }
        STATUS_PHRASES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, phrase)| *phrase)
            .collect()
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
