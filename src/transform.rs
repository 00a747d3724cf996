//! World-to-screen projection.
//!
//! World frame: x east, y magnetic north, z up. Device frame: x right, y up
//! along the screen, z out of the screen towards the viewer, so the camera
//! looks down -z and `depth = -v.z`.

use crate::geo;
use crate::types::{
    FieldOfView, Fix, GeomagneticField, Matrix3, ScreenCoordinates, Status, SurfaceGeometry,
    Vector3,
};

/// Standard gravity, m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Below this squared gravity magnitude the device is treated as in free fall.
const FREE_FALL_GRAVITY_SQUARED: f64 = 0.01 * STANDARD_GRAVITY * STANDARD_GRAVITY;

/// Minimum east-vector norm; smaller means the device is close to magnetic north/south pole
/// alignment or the field reading is unusable.
const MIN_EAST_NORM: f64 = 0.1;

/// Points whose forward component is below this fraction of the lateral ones are dropped.
const EDGE_ON_RATIO: f64 = 0.03;

/// Sign/axis-swap table mapping sensor axes onto display axes, one row per 90° rotation.
const SCREEN_ROTATION_ADJUST: [[f64; 4]; 4] = [
    [1.0, 0.0, 0.0, -1.0],
    [0.0, -1.0, -1.0, 0.0],
    [-1.0, 0.0, 0.0, 1.0],
    [0.0, 1.0, 1.0, 0.0],
];

/// Device-to-world rotation from a gravity and a magnetic field sample.
///
/// Rows are the world east, north and up axes expressed in device coordinates.
/// Returns `None` in free fall or when the field is (nearly) parallel to gravity.
pub fn rotation_matrix(gravity: Vector3, magnetic: Vector3) -> Option<Matrix3> {
    let [ax, ay, az] = gravity;
    let [ex, ey, ez] = magnetic;

    let norm_sq_a = ax * ax + ay * ay + az * az;
    if norm_sq_a < FREE_FALL_GRAVITY_SQUARED {
        return None;
    }

    let mut hx = ey * az - ez * ay;
    let mut hy = ez * ax - ex * az;
    let mut hz = ex * ay - ey * ax;
    let norm_h = (hx * hx + hy * hy + hz * hz).sqrt();
    if norm_h < MIN_EAST_NORM {
        return None;
    }
    hx /= norm_h;
    hy /= norm_h;
    hz /= norm_h;

    let inv_a = 1.0 / norm_sq_a.sqrt();
    let (ax, ay, az) = (ax * inv_a, ay * inv_a, az * inv_a);

    let mx = ay * hz - az * hy;
    let my = az * hx - ax * hz;
    let mz = ax * hy - ay * hx;

    Some([[hx, hy, hz], [mx, my, mz], [ax, ay, az]])
}

/// Screen mapping for one surface configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    geometry: SurfaceGeometry,
    field_of_view: FieldOfView,
    m: [f64; 4],
    half_width: f64,
    half_height: f64,
}

impl Calibration {
    pub fn new(geometry: SurfaceGeometry, field_of_view: FieldOfView) -> Self {
        let half_width = geometry.width as f64 / 2.0;
        let half_height = geometry.height as f64 / 2.0;
        let ya = (field_of_view.horizontal / 2.0).to_radians().sin();
        let xa = (field_of_view.vertical / 2.0).to_radians().sin();

        let mut m = SCREEN_ROTATION_ADJUST[geometry.rotation.index()];
        m[0] *= half_width / xa;
        m[1] *= half_width / ya;
        m[2] *= half_height / xa;
        m[3] *= half_height / ya;

        Self {
            geometry,
            field_of_view,
            m,
            half_width,
            half_height,
        }
    }

    /// Whether this calibration was built for exactly these inputs.
    pub fn matches(&self, geometry: SurfaceGeometry, field_of_view: FieldOfView) -> bool {
        self.geometry == geometry && self.field_of_view == field_of_view
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    pub fn field_of_view(&self) -> FieldOfView {
        self.field_of_view
    }

    /// The 2x2 matrix, row-major.
    pub fn matrix(&self) -> [f64; 4] {
        self.m
    }

    fn to_screen(&self, v: Vector3) -> Option<ScreenCoordinates> {
        if v[2].abs() < EDGE_ON_RATIO * (v[0].abs() + v[1].abs()) {
            return None;
        }
        let x = -v[0] / v[2];
        let y = -v[1] / v[2];
        Some(ScreenCoordinates {
            x: self.half_width + self.m[0] * x + self.m[1] * y,
            y: self.half_height + self.m[2] * x + self.m[3] * y,
            depth: -v[2],
            distance: (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt(),
        })
    }

    /// Inverse of the perspective divide and screen mapping for a point in front.
    fn from_screen(&self, xs: f64, ys: f64) -> Option<Vector3> {
        let [a, b, c, d] = self.m;
        let det = a * d - b * c;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let (dx, dy) = (xs - self.half_width, ys - self.half_height);
        let x = (d * dx - b * dy) / det;
        let y = (a * dy - c * dx) / det;
        Some([x, y, -1.0])
    }
}

/// Access to the current projection, handed to markers while drawing.
pub trait Projector {
    /// Project a world position. `None` if the projection is not ready or the
    /// point is edge-on.
    fn project_from_position(&self, target: &Fix) -> Option<ScreenCoordinates>;

    /// Project a direction given as true bearing and elevation, in degrees.
    fn project_from_bearing(&self, bearing_deg: f64, elevation_deg: f64) -> Option<ScreenCoordinates>;

    fn window_width(&self) -> u32;

    fn window_height(&self) -> u32;
}

/// The projection engine: orientation, anchor position and screen calibration.
#[derive(Debug, Clone, Default)]
pub struct Transform {
    calibration: Option<Calibration>,
    rotation: Matrix3,
    anchor: Option<Fix>,
    field: Option<GeomagneticField>,
    valid: bool,
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the calibration; the next [`calibrate`](Self::calibrate) rebuilds it.
    pub fn invalidate(&mut self) {
        self.calibration = None;
    }

    /// Make sure the calibration reflects the given surface and field of view,
    /// rebuilding it if any input changed. Returns true if it was rebuilt.
    pub fn calibrate(&mut self, geometry: SurfaceGeometry, field_of_view: FieldOfView) -> bool {
        if let Some(current) = &self.calibration {
            if current.matches(geometry, field_of_view) {
                return false;
            }
        }
        log::debug!(
            "Calibrating projection: {}x{} rot={} fov=({:.2}, {:.2})",
            geometry.width,
            geometry.height,
            geometry.rotation.degrees(),
            field_of_view.horizontal,
            field_of_view.vertical
        );
        self.calibration = Some(Calibration::new(geometry, field_of_view));
        true
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Feed the latest samples. Returns the health of the inputs.
    ///
    /// Projections fail closed until every input is present and the
    /// orientation could be derived.
    pub fn refresh(
        &mut self,
        gravity: Option<Vector3>,
        magnetic: Option<Vector3>,
        fix: Option<Fix>,
        field: Option<GeomagneticField>,
    ) -> Status {
        let rotation = match (gravity, magnetic) {
            (Some(g), Some(m)) => rotation_matrix(g, m),
            _ => None,
        };
        if let Some(rotation) = rotation {
            self.rotation = rotation;
        }
        self.anchor = fix;
        self.field = field;
        self.valid = rotation.is_some() && fix.is_some() && field.is_some();

        let mut status = Status::empty();
        status.set(Status::GRAVITY_SENSOR_FAILED, gravity.is_none());
        status.set(Status::MAGNETIC_SENSOR_FAILED, magnetic.is_none());
        status.set(Status::POSITION_SENSOR_FAILED, fix.is_none());
        status.set(Status::GEOMAGNETIC_MODEL_FAILED, field.is_none());

        match fix {
            Some(fix) if self.valid && !fix.is_precise() => Status::LOW_ACCURACY_POSITION,
            _ if self.valid => Status::empty(),
            _ => status,
        }
    }

    /// True after a refresh that had every input.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn orientation(&self) -> Option<Matrix3> {
        self.valid.then_some(self.rotation)
    }

    fn ready(&self) -> Option<(&Calibration, &GeomagneticField)> {
        if !self.valid {
            return None;
        }
        let calibration = self.calibration.as_ref()?;
        if !calibration.field_of_view.is_active() {
            return None;
        }
        Some((calibration, self.field.as_ref()?))
    }

    pub fn project_from_position(&self, target: &Fix) -> Option<ScreenCoordinates> {
        let (calibration, field) = self.ready()?;
        let anchor = self.anchor.as_ref()?;

        let distance = geo::distance_m(anchor, target);
        let bearing = (geo::bearing_deg(anchor, target) - field.declination_deg).to_radians();
        let world = [
            distance * bearing.sin(),
            distance * bearing.cos(),
            target.altitude - anchor.altitude,
        ];
        calibration.to_screen(self.to_device(world))
    }

    pub fn project_from_bearing(&self, bearing_deg: f64, elevation_deg: f64) -> Option<ScreenCoordinates> {
        let (calibration, field) = self.ready()?;

        let bearing = (bearing_deg - field.declination_deg).to_radians();
        let elevation = elevation_deg.to_radians();
        let world = [
            bearing.sin() * elevation.cos(),
            bearing.cos() * elevation.cos(),
            elevation.sin(),
        ];
        calibration.to_screen(self.to_device(world))
    }

    /// Direction (true bearing, elevation in degrees) seen at a screen point.
    pub fn unproject(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (calibration, field) = self.ready()?;
        let world = self.to_world(calibration.from_screen(x, y)?);

        let horizontal = world[0].hypot(world[1]);
        let elevation = world[2].atan2(horizontal).to_degrees();
        let bearing = world[0].atan2(world[1]).to_degrees() + field.declination_deg;
        Some((normalize_degrees(bearing), elevation))
    }

    fn to_device(&self, w: Vector3) -> Vector3 {
        let r = &self.rotation;
        [
            r[0][0] * w[0] + r[1][0] * w[1] + r[2][0] * w[2],
            r[0][1] * w[0] + r[1][1] * w[1] + r[2][1] * w[2],
            r[0][2] * w[0] + r[1][2] * w[1] + r[2][2] * w[2],
        ]
    }

    fn to_world(&self, v: Vector3) -> Vector3 {
        let r = &self.rotation;
        [
            r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
            r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
            r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
        ]
    }
}

impl Projector for Transform {
    fn project_from_position(&self, target: &Fix) -> Option<ScreenCoordinates> {
        Transform::project_from_position(self, target)
    }

    fn project_from_bearing(&self, bearing_deg: f64, elevation_deg: f64) -> Option<ScreenCoordinates> {
        Transform::project_from_bearing(self, bearing_deg, elevation_deg)
    }

    fn window_width(&self) -> u32 {
        self.calibration.map(|c| c.geometry.width).unwrap_or(0)
    }

    fn window_height(&self) -> u32 {
        self.calibration.map(|c| c.geometry.height).unwrap_or(0)
    }
}

/// Wrap an angle into `(-180, 180]`.
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Provider, Rotation};

    const UPRIGHT_GRAVITY: Vector3 = [0.0, STANDARD_GRAVITY, 0.0];
    const UPRIGHT_FIELD_NORTH: Vector3 = [0.0, -40.0, -20.0];

    fn anchor(precise: bool) -> Fix {
        let mut fix = Fix::new(45.0, 7.0, 200.0, 1_000, Provider::Satellite);
        fix.precise = Some(precise);
        fix
    }

    fn field(declination_deg: f64) -> GeomagneticField {
        GeomagneticField {
            declination_deg,
            inclination_deg: 60.0,
            intensity_nt: 47_000.0,
        }
    }

    fn ready_transform(gravity: Vector3, magnetic: Vector3, rotation: Rotation, declination: f64) -> Transform {
        let mut transform = Transform::new();
        transform.calibrate(
            SurfaceGeometry::new(1080, 1920, rotation),
            FieldOfView::new(60.0, 45.0),
        );
        let status = transform.refresh(Some(gravity), Some(magnetic), Some(anchor(true)), Some(field(declination)));
        assert!(status.is_empty());
        transform
    }

    #[test]
    fn test_rotation_matrix_upright_facing_north() {
        let r = rotation_matrix(UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH).unwrap();
        let expected = [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert!((r[i][j] - expected[i][j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_rotation_matrix_free_fall() {
        assert!(rotation_matrix([0.1, 0.2, 0.1], UPRIGHT_FIELD_NORTH).is_none());
        assert!(rotation_matrix(UPRIGHT_GRAVITY, [0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_north_horizon_projects_to_center() {
        let t = ready_transform(UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH, Rotation::Deg0, 0.0);
        let p = t.project_from_bearing(0.0, 0.0).unwrap();
        assert!((p.x - 540.0).abs() < 1e-9);
        assert!((p.y - 960.0).abs() < 1e-9);
        assert!((p.depth - 1.0).abs() < 1e-12);
        assert!((p.distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_east_is_right_and_up_is_up() {
        let t = ready_transform(UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH, Rotation::Deg0, 0.0);
        let right = t.project_from_bearing(10.0, 0.0).unwrap();
        assert!(right.x > 540.0);
        let up = t.project_from_bearing(0.0, 10.0).unwrap();
        assert!(up.y < 960.0);
    }

    #[test]
    fn test_declination_shifts_bearing() {
        let t = ready_transform(UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH, Rotation::Deg0, 12.0);
        let p = t.project_from_bearing(12.0, 0.0).unwrap();
        assert!((p.x - 540.0).abs() < 1e-9);
    }

    #[test]
    fn test_behind_has_negative_depth() {
        let t = ready_transform(UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH, Rotation::Deg0, 0.0);
        let p = t.project_from_bearing(180.0, 0.0).unwrap();
        assert!(!p.is_in_front());
    }

    #[test]
    fn test_edge_on_is_suppressed() {
        let t = ready_transform(UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH, Rotation::Deg0, 0.0);
        assert!(t.project_from_bearing(90.0, 0.0).is_none());
        assert!(t.project_from_bearing(89.0, 0.0).is_none());
        assert!(t.project_from_bearing(85.0, 0.0).is_some());
    }

    #[test]
    fn test_position_projection() {
        let t = ready_transform(UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH, Rotation::Deg0, 0.0);
        let north = Fix::at(45.001, 7.0, 200.0);
        let p = t.project_from_position(&north).unwrap();
        assert!((p.x - 540.0).abs() < 1e-6);
        assert!((p.y - 960.0).abs() < 1e-6);
        assert!((p.distance - 111.195).abs() < 0.01);
        let higher = Fix::at(45.001, 7.0, 250.0);
        assert!(t.project_from_position(&higher).unwrap().y < 960.0);
    }

    #[test]
    fn test_missing_gravity_fails_closed() {
        let mut t = Transform::new();
        t.calibrate(SurfaceGeometry::new(1080, 1920, Rotation::Deg0), FieldOfView::new(60.0, 45.0));
        let status = t.refresh(None, Some([0.0, 0.0, 0.0]), Some(anchor(true)), Some(field(0.0)));
        assert_eq!(status, Status::GRAVITY_SENSOR_FAILED);
        assert!(t.project_from_bearing(0.0, 0.0).is_none());
        assert!(t.project_from_position(&Fix::at(45.001, 7.0, 200.0)).is_none());
    }

    #[test]
    fn test_every_missing_input_sets_its_bit() {
        let mut t = Transform::new();
        assert_eq!(t.refresh(None, None, None, None), Status::all() - Status::LOW_ACCURACY_POSITION);
        assert_eq!(
            t.refresh(Some(UPRIGHT_GRAVITY), Some(UPRIGHT_FIELD_NORTH), None, Some(field(0.0))),
            Status::POSITION_SENSOR_FAILED
        );
        assert_eq!(
            t.refresh(Some(UPRIGHT_GRAVITY), Some(UPRIGHT_FIELD_NORTH), Some(anchor(true)), None),
            Status::GEOMAGNETIC_MODEL_FAILED
        );
    }

    #[test]
    fn test_imprecise_fix_reports_low_accuracy_only() {
        let mut t = Transform::new();
        let status = t.refresh(
            Some(UPRIGHT_GRAVITY),
            Some(UPRIGHT_FIELD_NORTH),
            Some(anchor(false)),
            Some(field(0.0)),
        );
        assert_eq!(status, Status::LOW_ACCURACY_POSITION);
        assert_eq!(status.decode(), "Using low accuracy location; ");
        assert!(t.is_valid());
    }

    #[test]
    fn test_no_projection_without_field_of_view() {
        let mut t = Transform::new();
        t.calibrate(SurfaceGeometry::new(1080, 1920, Rotation::Deg0), FieldOfView::NONE);
        t.refresh(Some(UPRIGHT_GRAVITY), Some(UPRIGHT_FIELD_NORTH), Some(anchor(true)), Some(field(0.0)));
        assert!(t.project_from_bearing(0.0, 0.0).is_none());
    }

    #[test]
    fn test_calibration_rebuilt_only_on_change() {
        let mut t = Transform::new();
        let geometry = SurfaceGeometry::new(1080, 1920, Rotation::Deg0);
        assert!(t.calibrate(geometry, FieldOfView::new(60.0, 45.0)));
        assert!(!t.calibrate(geometry, FieldOfView::new(60.0, 45.0)));
        assert!(t.calibrate(geometry, FieldOfView::new(62.0, 45.0)));
        assert!(t.calibrate(SurfaceGeometry::new(1920, 1080, Rotation::Deg90), FieldOfView::new(62.0, 45.0)));
        t.invalidate();
        assert!(t.calibration().is_none());
    }

    #[test]
    fn test_calibration_coefficients() {
        let c = Calibration::new(SurfaceGeometry::new(1000, 2000, Rotation::Deg90), FieldOfView::new(60.0, 60.0));
        let m = c.matrix();
        assert_eq!(m[0], 0.0);
        assert!((m[1] + 1000.0).abs() < 1e-9);
        assert!((m[2] + 2000.0).abs() < 1e-9);
        assert_eq!(m[3], 0.0);
    }

    #[test]
    fn test_bearing_round_trip() {
        let orientations = [
            (UPRIGHT_GRAVITY, UPRIGHT_FIELD_NORTH),
            ([1.5, 9.0, 3.0], [10.0, -30.0, -25.0]),
            ([-4.0, 2.0, 8.5], [-22.0, 15.0, -35.0]),
        ];
        let rotations = [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];
        let mut checked = 0;
        for (gravity, magnetic) in orientations {
            for rotation in rotations {
                let t = ready_transform(gravity, magnetic, rotation, 7.5);
                for bearing in (-180..180).step_by(15) {
                    for elevation in (-75..=75).step_by(15) {
                        let (b, e) = (bearing as f64, elevation as f64);
                        let Some(p) = t.project_from_bearing(b, e) else {
                            continue;
                        };
                        if !p.is_in_front() {
                            continue;
                        }
                        let (rb, re) = t.unproject(p.x, p.y).unwrap();
                        assert!((re - e).abs() < 1e-6, "elevation {} -> {}", e, re);
                        assert!(normalize_degrees(rb - b).abs() < 1e-6, "bearing {} -> {}", b, rb);
                        checked += 1;
                    }
                }
            }
        }
        assert!(checked > 100);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(190.0), -170.0);
        assert_eq!(normalize_degrees(-190.0), 170.0);
        assert_eq!(normalize_degrees(180.0), 180.0);
    }
}
