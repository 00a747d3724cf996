use crate::error::ArError;
use crate::geo::GeomagneticModel;
use crate::params::{
    ParameterBus, SubscriptionId, GRAVITY_FILTER_COEFFICIENT, MAGNETIC_FILTER_COEFFICIENT,
    POSITION_READ_INTERVAL,
};
use crate::queue::{task_queue, TaskQueue};
use crate::slot::SharedSlot;
use crate::types::{now_ms, Fix, GeomagneticField, Provider, Vector3};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A low-accuracy fix replaces the current one only if it is this much newer.
pub const STALE_FIX_MS: u64 = 2 * 60 * 1000;

/// Latest sensor-derived values, written by the fusion worker and read by
/// the render loop.
#[derive(Debug, Default)]
pub struct SensorSlots {
    pub gravity: SharedSlot<Vector3>,
    pub magnetic: SharedSlot<Vector3>,
    pub fix: SharedSlot<Fix>,
    pub field: SharedSlot<GeomagneticField>,
}

/// The sources a fusion worker listens to. Handed back when it stops.
pub struct Sources {
    pub motion: Box<dyn MotionSensors>,
    pub position: Box<dyn PositionSource>,
}

impl std::fmt::Debug for Sources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sources").finish_non_exhaustive()
    }
}

/// A failed [`SensorFusion::start`].
///
/// `sources` is `None` only when the worker thread could not be spawned or
/// panicked before handing them back.
#[derive(Debug, thiserror::Error)]
#[error("sensor fusion did not start: {error}")]
pub struct StartError {
    pub error: ArError,
    pub sources: Option<Sources>,
}

/// Accelerometer/gravity and magnetometer source.
pub trait MotionSensors: Send {
    /// Start delivering samples to `sink`. Returns false if no sensor is
    /// available; the overlay status then reports the missing channel.
    fn register(&mut self, sink: SensorSink) -> bool;

    fn unregister(&mut self);
}

/// Satellite/network position source.
pub trait PositionSource: Send {
    fn last_known(&self) -> Option<Fix>;

    /// Deliver fixes to `sink` roughly every `interval` (zero: as fast as possible).
    fn request_updates(&mut self, interval: Duration, sink: SensorSink);

    fn cancel_updates(&mut self);
}

/// Handle through which sources push samples onto the fusion worker.
///
/// Cheap to clone. Samples pushed after shutdown began are dropped.
#[derive(Clone)]
pub struct SensorSink {
    queue: TaskQueue<FusionState>,
    accepting: Arc<AtomicBool>,
}

impl SensorSink {
    fn push(&self, task: impl FnOnce(&mut FusionState) + Send + 'static) -> bool {
        self.accepting.load(Ordering::Acquire) && self.queue.post(task)
    }

    pub fn gravity(&self, sample: Vector3) -> bool {
        self.push(move |state| state.on_gravity(sample, now_ms()))
    }

    pub fn magnetic(&self, sample: Vector3) -> bool {
        self.push(move |state| state.on_magnetic(sample))
    }

    pub fn fix(&self, fix: Fix) -> bool {
        self.push(move |state| state.on_fix(fix, now_ms()))
    }
}

/// Exponential smoothing, `new·(1−c) + previous·c` per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassFilter {
    pub coefficient: f32,
}

impl LowPassFilter {
    pub fn new(coefficient: f32) -> Self {
        Self { coefficient }
    }

    pub fn apply(&self, sample: Vector3, previous: Option<Vector3>) -> Vector3 {
        let Some(previous) = previous else {
            return sample;
        };
        let c = self.coefficient as f64;
        [
            sample[0] * (1.0 - c) + previous[0] * c,
            sample[1] * (1.0 - c) + previous[1] * c,
            sample[2] * (1.0 - c) + previous[2] * c,
        ]
    }
}

/// Whether `candidate` should replace `current` as the authoritative fix.
pub fn accepts_fix(current: Option<&Fix>, candidate: &Fix) -> bool {
    match current {
        None => true,
        Some(_) if candidate.provider == Provider::Satellite => true,
        Some(current) => candidate.time_ms.saturating_sub(current.time_ms) > STALE_FIX_MS,
    }
}

/// A fix is precise if it is a satellite fix whose age, less the provider's
/// usual reporting delay, is under three read intervals.
pub fn classify_precision(fix: &Fix, now_ms: u64, delay_ms: i64, interval: Duration) -> bool {
    let age = i128::from(now_ms) - i128::from(fix.time_ms) - i128::from(delay_ms);
    // Any Duration in milliseconds fits in 75 bits, so neither step can overflow.
    let window = 3 * interval.as_millis() as i128;
    fix.provider == Provider::Satellite && age < window
}

/// State confined to the fusion worker thread.
struct FusionState {
    slots: Arc<SensorSlots>,
    bus: Arc<ParameterBus>,
    model: Arc<dyn GeomagneticModel>,
    sources: Sources,
    sink: SensorSink,
    gravity_filter: LowPassFilter,
    magnetic_filter: LowPassFilter,
    interval: Duration,
    satellite_delay_ms: i64,
    last_classified_ms: u64,
    sensors_registered: bool,
    updates_requested: bool,
    gravity_sub: Option<SubscriptionId>,
    magnetic_sub: Option<SubscriptionId>,
    interval_sub: Option<SubscriptionId>,
}

impl FusionState {
    fn on_gravity(&mut self, sample: Vector3, now: u64) {
        let filtered = self.gravity_filter.apply(sample, self.slots.gravity.get());
        self.slots.gravity.set(filtered);
        self.reclassify(now);
    }

    fn on_magnetic(&mut self, sample: Vector3) {
        let filtered = self.magnetic_filter.apply(sample, self.slots.magnetic.get());
        self.slots.magnetic.set(filtered);
    }

    fn on_fix(&mut self, fix: Fix, now: u64) {
        if fix.provider == Provider::Satellite {
            self.satellite_delay_ms = now as i64 - fix.time_ms as i64;
        }
        self.offer(fix);
    }

    fn offer(&mut self, fix: Fix) {
        if !accepts_fix(self.slots.fix.get().as_ref(), &fix) {
            log::trace!("Ignoring {:?} fix from {}", fix.provider, fix.time_ms);
            return;
        }
        match self
            .model
            .field_at(fix.latitude, fix.longitude, fix.altitude, fix.time_ms)
        {
            Some(field) => self.slots.field.set(field),
            None => {
                log::warn!("Geomagnetic model failed at ({}, {})", fix.latitude, fix.longitude);
                self.slots.field.clear();
            }
        }
        self.slots.fix.set(fix);
        log::debug!(
            "Accepted {:?} fix ({:.6}, {:.6}) at {}",
            fix.provider,
            fix.latitude,
            fix.longitude,
            fix.time_ms
        );
    }

    /// Re-evaluate the precision flag of the current fix, at most once per read interval.
    fn reclassify(&mut self, now: u64) {
        if u128::from(now.saturating_sub(self.last_classified_ms)) < self.interval.as_millis() {
            return;
        }
        self.last_classified_ms = now;

        let Some(mut fix) = self.slots.fix.get() else {
            return;
        };
        let precise = classify_precision(&fix, now, self.satellite_delay_ms, self.interval);
        if fix.precise != Some(precise) {
            fix.precise = Some(precise);
            self.slots.fix.set(fix);
            log::debug!("Fix precision now {}", precise);
        }
    }

    fn request_updates(&mut self, interval: Duration) {
        if self.updates_requested {
            self.sources.position.cancel_updates();
        }
        self.interval = interval;
        self.sources.position.request_updates(interval, self.sink.clone());
        self.updates_requested = true;
    }

    fn attach(&mut self, queue: &TaskQueue<FusionState>) -> Result<()> {
        if !self.sources.motion.register(self.sink.clone()) {
            log::warn!("Motion sensors unavailable");
        }
        self.sensors_registered = true;
        self.request_updates(self.interval);

        self.gravity_sub = Some(self.bus.subscribe_on(
            GRAVITY_FILTER_COEFFICIENT,
            queue,
            |state: &mut FusionState, _, new: f32, _| state.gravity_filter.coefficient = new,
        )?);
        self.magnetic_sub = Some(self.bus.subscribe_on(
            MAGNETIC_FILTER_COEFFICIENT,
            queue,
            |state: &mut FusionState, _, new: f32, _| state.magnetic_filter.coefficient = new,
        )?);
        self.interval_sub = Some(self.bus.subscribe_on(
            POSITION_READ_INTERVAL,
            queue,
            |state: &mut FusionState, _, new: Duration, _| {
                log::debug!("Position read interval now {:?}", new);
                state.request_updates(new);
            },
        )?);
        Ok(())
    }

    /// Stop listening to sources and the bus. Safe to call more than once.
    fn detach(&mut self) {
        self.sink.accepting.store(false, Ordering::Release);
        if self.sensors_registered {
            self.sources.motion.unregister();
            self.sensors_registered = false;
        }
        if self.updates_requested {
            self.sources.position.cancel_updates();
            self.updates_requested = false;
        }
        if let Some(id) = self.gravity_sub.take() {
            self.bus.unsubscribe(GRAVITY_FILTER_COEFFICIENT, id);
        }
        if let Some(id) = self.magnetic_sub.take() {
            self.bus.unsubscribe(MAGNETIC_FILTER_COEFFICIENT, id);
        }
        if let Some(id) = self.interval_sub.take() {
            self.bus.unsubscribe(POSITION_READ_INTERVAL, id);
        }
    }
}

/// Handle to the running sensor fusion worker.
///
/// The worker owns the sources and filter state; sources talk to it through
/// a [`SensorSink`] and the bus reaches it through queued subscriptions.
pub struct SensorFusion {
    queue: TaskQueue<FusionState>,
    accepting: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<Sources>>,
}

impl SensorFusion {
    /// Start the worker and wait until it is listening.
    ///
    /// The filter coefficients and read interval must already be on the bus.
    /// On failure the sources come back in the [`StartError`].
    pub fn start(
        bus: Arc<ParameterBus>,
        slots: Arc<SensorSlots>,
        sources: Sources,
        model: Arc<dyn GeomagneticModel>,
    ) -> std::result::Result<SensorFusion, StartError> {
        let (gravity, magnetic, interval) = match read_parameters(&bus) {
            Ok(parameters) => parameters,
            Err(error) => {
                return Err(StartError {
                    error,
                    sources: Some(sources),
                })
            }
        };
        let (queue, looper) = task_queue::<FusionState>();
        let accepting = Arc::new(AtomicBool::new(true));
        let sink = SensorSink {
            queue: queue.clone(),
            accepting: accepting.clone(),
        };

        let mut state = FusionState {
            gravity_filter: LowPassFilter::new(gravity),
            magnetic_filter: LowPassFilter::new(magnetic),
            interval,
            slots,
            bus,
            model,
            sources,
            sink,
            satellite_delay_ms: 0,
            last_classified_ms: now_ms(),
            sensors_registered: false,
            updates_requested: false,
            gravity_sub: None,
            magnetic_sub: None,
            interval_sub: None,
        };
        if let Some(fix) = state.sources.position.last_known() {
            state.offer(fix);
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let worker_queue = queue.clone();
        let thread = std::thread::Builder::new()
            .name("arlens-fusion".into())
            .spawn(move || {
                let attached = state.attach(&worker_queue);
                let ok = attached.is_ok();
                let _ = ready_tx.send(attached);
                drop(worker_queue);
                if ok {
                    log::info!("Sensor fusion started");
                    let tasks = looper.run(&mut state);
                    log::info!("Sensor fusion stopped after {} tasks", tasks);
                }
                state.detach();
                state.sources
            })
            .map_err(|source| StartError {
                error: ArError::ThreadSpawn {
                    name: "arlens-fusion",
                    source,
                },
                sources: None,
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(ArError::ResourceAcquisitionFailed(
                "sensor fusion worker exited before it was ready".into(),
            ))
        });
        if let Err(error) = ready {
            return Err(StartError {
                error,
                sources: thread.join().ok(),
            });
        }

        Ok(SensorFusion {
            queue,
            accepting,
            thread: Some(thread),
        })
    }

    /// A sink for pushing samples from outside the registered sources.
    pub fn sink(&self) -> SensorSink {
        SensorSink {
            queue: self.queue.clone(),
            accepting: self.accepting.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Detach from sources and the bus, drain the queue and join the worker.
    ///
    /// Returns the sources for reuse, or `None` if the worker panicked.
    pub fn stop(mut self) -> Option<Sources> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<Sources> {
        let thread = self.thread.take()?;
        self.accepting.store(false, Ordering::Release);
        self.queue.post(|state: &mut FusionState| state.detach());
        self.queue.quit();
        match thread.join() {
            Ok(sources) => Some(sources),
            Err(_) => {
                log::warn!("Sensor fusion worker panicked");
                None
            }
        }
    }
}

fn read_parameters(bus: &ParameterBus) -> Result<(f32, f32, Duration)> {
    Ok((
        bus.get(GRAVITY_FILTER_COEFFICIENT)?,
        bus.get(MAGNETIC_FILTER_COEFFICIENT)?,
        bus.get(POSITION_READ_INTERVAL)?,
    ))
}

impl Drop for SensorFusion {
    fn drop(&mut self) {
        self.shutdown();
    }
}
