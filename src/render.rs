use crate::error::ArError;
use crate::marker::{Canvas, Marker};
use crate::params::{ParameterBus, SubscriptionId, FRAME_DELAY};
use crate::transform::Transform;
use crate::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use crossbeam_utils::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Owner of the marker collection, as seen by the render loop.
pub trait MarkerHost: Send + Sync {
    /// Replace `into` with the current markers, in drawing order.
    fn snapshot(&self, into: &mut Vec<Arc<dyn Marker>>);

    /// Bring `projection` up to date with the latest samples and geometry.
    fn refresh_projection(&self, projection: &mut Transform);

    /// Drop any bus subscriptions made from [`refresh_projection`](Self::refresh_projection).
    fn release_subscriptions(&self);
}

/// Host window the overlay paints into.
pub trait DrawingSurface: Send + Sync {
    /// Lock a canvas, run `paint` on it and present the frame.
    ///
    /// Returns false if no canvas could be locked; the render loop then exits.
    fn render(&self, paint: &mut dyn FnMut(&mut dyn Canvas)) -> bool;
}

/// Handle to the running render loop.
pub struct RenderLoop {
    interrupt: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl RenderLoop {
    /// Spawn the render thread. `FRAME_DELAY` must already be on the bus.
    pub fn start(
        bus: Arc<ParameterBus>,
        host: Arc<dyn MarkerHost>,
        surface: Arc<dyn DrawingSurface>,
    ) -> Result<RenderLoop> {
        let delay = Arc::new(AtomicCell::new(bus.get(FRAME_DELAY)?));
        let delay_sink = delay.clone();
        let delay_sub = bus.subscribe(FRAME_DELAY, move |_, new, _| delay_sink.store(new))?;

        let interrupt = Arc::new(AtomicBool::new(false));
        let (wake, sleeper) = crossbeam_channel::bounded::<()>(0);

        let cleanup = Cleanup {
            bus,
            host: host.clone(),
            delay_sub,
        };
        let frame = FrameLoop {
            host,
            surface,
            delay,
            interrupt: interrupt.clone(),
            sleeper,
        };
        let thread = std::thread::Builder::new()
            .name("arlens-render".into())
            .spawn(move || {
                let _cleanup = cleanup;
                frame.run();
            })
            .map_err(|source| ArError::ThreadSpawn {
                name: "arlens-render",
                source,
            })?;

        Ok(RenderLoop {
            interrupt,
            wake: Some(wake),
            thread: Some(thread),
        })
    }

    /// False once the loop has exited on its own (surface gone).
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Interrupt the loop, including a pending frame delay, and join it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.interrupt.store(true, Ordering::Relaxed);
        self.wake.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Render thread panicked");
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Returns subscriptions to their owners however the render thread exits.
struct Cleanup {
    bus: Arc<ParameterBus>,
    host: Arc<dyn MarkerHost>,
    delay_sub: SubscriptionId,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.host.release_subscriptions();
        self.bus.unsubscribe(FRAME_DELAY, self.delay_sub);
    }
}

struct FrameLoop {
    host: Arc<dyn MarkerHost>,
    surface: Arc<dyn DrawingSurface>,
    delay: Arc<AtomicCell<Duration>>,
    interrupt: Arc<AtomicBool>,
    sleeper: Receiver<()>,
}

impl FrameLoop {
    fn run(self) {
        let mut markers: Vec<Arc<dyn Marker>> = Vec::new();
        let mut projection = Transform::new();
        let mut frames: u64 = 0;

        log::info!("Render loop started");
        while !self.interrupt.load(Ordering::Relaxed) {
            self.host.snapshot(&mut markers);

            let presented = self.surface.render(&mut |canvas: &mut dyn Canvas| {
                canvas.clear();
                self.host.refresh_projection(&mut projection);
                for marker in &markers {
                    canvas.save();
                    marker.draw(canvas, &projection);
                    canvas.restore();
                }
            });
            if !presented {
                log::info!("Drawing surface unavailable, render loop exiting");
                break;
            }
            frames += 1;
            log::trace!("Frame {} ({} markers)", frames, markers.len());

            match self.sleeper.recv_timeout(self.delay.load()) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("Render loop stopped after {} frames", frames);
    }
}
