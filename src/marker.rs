//! What the render loop draws and the host hit-tests.
//!
//! Drawing primitives belong to the host; the overlay only hands markers a
//! [`Canvas`] to bracket state changes on and a [`Projector`] to place
//! themselves with.

use crate::slot::SharedSlot;
use crate::transform::Projector;
use crate::types::{Fix, ScreenCoordinates};

/// Host drawing target for one frame.
pub trait Canvas {
    /// Erase the previous frame.
    fn clear(&mut self);

    fn save(&mut self);

    fn restore(&mut self);
}

/// Bitmap or vector image painted centred on a screen point.
pub trait MarkerImage: Send + Sync {
    fn draw(&self, canvas: &mut dyn Canvas, x: f64, y: f64, scale_x: f64, scale_y: f64);

    fn width(&self) -> f64;

    fn height(&self) -> f64;
}

/// An overlay element. Ids are free-form and need not be unique.
pub trait Marker: Send + Sync {
    fn id(&self) -> &str;

    /// Paint this marker for the current frame. Called on the render thread.
    fn draw(&self, canvas: &mut dyn Canvas, projector: &dyn Projector);

    /// Whether the screen point lies on the marker as last drawn.
    fn hit_test(&self, x: f64, y: f64) -> bool;
}

type ScaleFn = Box<dyn Fn(f64) -> f64 + Send + Sync>;

/// Image anchored to a world position.
pub struct LocationMarker {
    id: String,
    image: Box<dyn MarkerImage>,
    position: Fix,
    offset: (f64, f64),
    scale: Option<ScaleFn>,
    last: SharedSlot<ScreenCoordinates>,
}

impl LocationMarker {
    pub fn new(id: impl Into<String>, image: Box<dyn MarkerImage>, position: Fix) -> Self {
        Self {
            id: id.into(),
            image,
            position,
            offset: (0.0, 0.0),
            scale: None,
            last: SharedSlot::new(),
        }
    }

    /// Pixel offset from the projected point, scaled along with the image.
    pub fn with_offset(mut self, x: f64, y: f64) -> Self {
        self.offset = (x, y);
        self
    }

    /// Map the distance to the target (meters) to an image scale.
    /// A non-positive scale hides the marker.
    pub fn with_scale(mut self, scale: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.scale = Some(Box::new(scale));
        self
    }

    pub fn position(&self) -> &Fix {
        &self.position
    }

    fn scale_for(&self, distance: f64) -> f64 {
        self.scale.as_ref().map_or(1.0, |scale| scale(distance))
    }

    /// Visible screen point and scale from the last draw.
    fn placement(&self) -> Option<(ScreenCoordinates, f64)> {
        let coords = self.last.get().filter(ScreenCoordinates::is_in_front)?;
        let scale = self.scale_for(coords.distance);
        (scale > 0.0).then_some((coords, scale))
    }
}

impl Marker for LocationMarker {
    fn id(&self) -> &str {
        &self.id
    }

    fn draw(&self, canvas: &mut dyn Canvas, projector: &dyn Projector) {
        self.last.replace(projector.project_from_position(&self.position));
        if let Some((at, scale)) = self.placement() {
            self.image.draw(
                canvas,
                at.x + self.offset.0 * scale,
                at.y + self.offset.1 * scale,
                scale,
                scale,
            );
        }
    }

    fn hit_test(&self, x: f64, y: f64) -> bool {
        let Some((at, scale)) = self.placement() else {
            return false;
        };
        let (half_w, half_h) = (self.image.width() / 2.0, self.image.height() / 2.0);
        x >= at.x + (self.offset.0 - half_w) * scale
            && x <= at.x + (self.offset.0 + half_w) * scale
            && y >= at.y + (self.offset.1 - half_h) * scale
            && y <= at.y + (self.offset.1 + half_h) * scale
    }
}

/// Image fixed to a compass direction, independent of the viewer's position.
pub struct DirectionMarker {
    id: String,
    image: Box<dyn MarkerImage>,
    bearing_deg: f64,
    elevation_deg: f64,
    offset: (f64, f64),
    last: SharedSlot<ScreenCoordinates>,
}

impl DirectionMarker {
    pub fn new(
        id: impl Into<String>,
        image: Box<dyn MarkerImage>,
        bearing_deg: f64,
        elevation_deg: f64,
    ) -> Self {
        Self {
            id: id.into(),
            image,
            bearing_deg,
            elevation_deg,
            offset: (0.0, 0.0),
            last: SharedSlot::new(),
        }
    }

    pub fn with_offset(mut self, x: f64, y: f64) -> Self {
        self.offset = (x, y);
        self
    }

    fn visible(&self) -> Option<ScreenCoordinates> {
        self.last.get().filter(ScreenCoordinates::is_in_front)
    }
}

impl Marker for DirectionMarker {
    fn id(&self) -> &str {
        &self.id
    }

    fn draw(&self, canvas: &mut dyn Canvas, projector: &dyn Projector) {
        self.last
            .replace(projector.project_from_bearing(self.bearing_deg, self.elevation_deg));
        if let Some(at) = self.visible() {
            self.image
                .draw(canvas, at.x + self.offset.0, at.y + self.offset.1, 1.0, 1.0);
        }
    }

    fn hit_test(&self, x: f64, y: f64) -> bool {
        let Some(at) = self.visible() else {
            return false;
        };
        let (cx, cy) = (at.x + self.offset.0, at.y + self.offset.1);
        let (half_w, half_h) = (self.image.width() / 2.0, self.image.height() / 2.0);
        (cx - half_w..=cx + half_w).contains(&x) && (cy - half_h..=cy + half_h).contains(&y)
    }
}

type PaintFn = Box<dyn Fn(&mut dyn Canvas, u32, u32) + Send + Sync>;

/// Full-window painter (HUD, compass strip). Never hit.
pub struct ScreenMarker {
    id: String,
    paint: PaintFn,
}

impl ScreenMarker {
    /// `paint` receives the canvas and the window width and height.
    pub fn new(
        id: impl Into<String>,
        paint: impl Fn(&mut dyn Canvas, u32, u32) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            paint: Box::new(paint),
        }
    }
}

impl Marker for ScreenMarker {
    fn id(&self) -> &str {
        &self.id
    }

    fn draw(&self, canvas: &mut dyn Canvas, projector: &dyn Projector) {
        (self.paint)(canvas, projector.window_width(), projector.window_height());
    }

    fn hit_test(&self, _x: f64, _y: f64) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingCanvas {
        ops: Vec<String>,
    }

    impl Canvas for RecordingCanvas {
        fn clear(&mut self) {
            self.ops.push("clear".into());
        }
        fn save(&mut self) {
            self.ops.push("save".into());
        }
        fn restore(&mut self) {
            self.ops.push("restore".into());
        }
    }

    /// Records the last draw call through a shared log.
    struct Square {
        side: f64,
        calls: Arc<Mutex<Vec<(f64, f64, f64)>>>,
    }

    impl MarkerImage for Square {
        fn draw(&self, canvas: &mut dyn Canvas, x: f64, y: f64, scale_x: f64, _scale_y: f64) {
            canvas.save();
            self.calls.lock().unwrap().push((x, y, scale_x));
            canvas.restore();
        }
        fn width(&self) -> f64 {
            self.side
        }
        fn height(&self) -> f64 {
            self.side
        }
    }

    /// Projects everything onto a fixed point.
    struct FixedProjector(Option<ScreenCoordinates>);

    impl Projector for FixedProjector {
        fn project_from_position(&self, _target: &Fix) -> Option<ScreenCoordinates> {
            self.0
        }
        fn project_from_bearing(&self, _b: f64, _e: f64) -> Option<ScreenCoordinates> {
            self.0
        }
        fn window_width(&self) -> u32 {
            800
        }
        fn window_height(&self) -> u32 {
            600
        }
    }

    fn at(x: f64, y: f64, depth: f64) -> FixedProjector {
        FixedProjector(Some(ScreenCoordinates {
            x,
            y,
            depth,
            distance: 100.0,
        }))
    }

    fn square(side: f64) -> (Box<dyn MarkerImage>, Arc<Mutex<Vec<(f64, f64, f64)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(Square {
                side,
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }

    #[test]
    fn test_location_marker_draws_in_front() {
        let (image, calls) = square(20.0);
        let marker = LocationMarker::new("poi", image, Fix::at(1.0, 2.0, 0.0)).with_offset(5.0, -5.0);
        let mut canvas = RecordingCanvas::default();
        marker.draw(&mut canvas, &at(100.0, 200.0, 1.0));
        assert_eq!(*calls.lock().unwrap(), vec![(105.0, 195.0, 1.0)]);
        assert_eq!(canvas.ops, vec!["save", "restore"]);

        assert!(marker.hit_test(105.0, 195.0));
        assert!(marker.hit_test(115.0, 205.0));
        assert!(!marker.hit_test(116.0, 195.0));
    }

    #[test]
    fn test_location_marker_behind_viewer_is_hidden() {
        let (image, calls) = square(20.0);
        let marker = LocationMarker::new("poi", image, Fix::at(0.0, 0.0, 0.0));
        let mut canvas = RecordingCanvas::default();
        marker.draw(&mut canvas, &at(100.0, 100.0, -1.0));
        assert!(calls.lock().unwrap().is_empty());
        assert!(!marker.hit_test(100.0, 100.0));

        marker.draw(&mut canvas, &FixedProjector(None));
        assert!(!marker.hit_test(100.0, 100.0));
    }

    #[test]
    fn test_location_marker_scale_hook() {
        let (image, calls) = square(20.0);
        let marker = LocationMarker::new("far", image, Fix::at(0.0, 0.0, 0.0))
            .with_offset(10.0, 0.0)
            .with_scale(|distance| 50.0 / distance);
        let mut canvas = RecordingCanvas::default();
        marker.draw(&mut canvas, &at(0.0, 0.0, 1.0));
        assert_eq!(*calls.lock().unwrap(), vec![(5.0, 0.0, 0.5)]);
        assert!(marker.hit_test(9.9, 0.0));
        assert!(!marker.hit_test(10.1, 0.0));

        let (image, calls) = square(20.0);
        let hidden = LocationMarker::new("gone", image, Fix::at(0.0, 0.0, 0.0)).with_scale(|_| 0.0);
        hidden.draw(&mut canvas, &at(0.0, 0.0, 1.0));
        assert!(calls.lock().unwrap().is_empty());
        assert!(!hidden.hit_test(0.0, 0.0));
    }

    #[test]
    fn test_direction_marker() {
        let (image, calls) = square(10.0);
        let marker = DirectionMarker::new("north", image, 0.0, 0.0);
        assert!(!marker.hit_test(50.0, 50.0));
        let mut canvas = RecordingCanvas::default();
        marker.draw(&mut canvas, &at(50.0, 50.0, 1.0));
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(marker.hit_test(55.0, 45.0));
        assert!(!marker.hit_test(56.0, 50.0));
    }

    #[test]
    fn test_screen_marker_gets_window_size() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let marker = ScreenMarker::new("hud", move |canvas, w, h| {
            canvas.save();
            *sink.lock().unwrap() = Some((w, h));
        });
        let mut canvas = RecordingCanvas::default();
        marker.draw(&mut canvas, &FixedProjector(None));
        assert_eq!(*seen.lock().unwrap(), Some((800, 600)));
        assert!(!marker.hit_test(0.0, 0.0));
        assert_eq!(marker.id(), "hud");
    }
}
