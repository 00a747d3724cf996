//! Observable key/value store for settings shared between threads.
//!
//! Each parameter is a typed atomic cell plus its own subscriber list. The map
//! of parameters is guarded by one mutex that is only held while looking a
//! parameter up or inserting it; values are read and swapped without it.

use crate::error::ArError;
use crate::queue::TaskQueue;
use crate::types::FieldOfView;
use crate::Result;
use crossbeam_utils::atomic::AtomicCell;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Typed name of a parameter.
pub struct Key<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> std::fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

/// Pause between two rendered frames.
pub const FRAME_DELAY: Key<Duration> = Key::new("sleep_time");
/// Requested interval between position updates.
pub const POSITION_READ_INTERVAL: Key<Duration> = Key::new("location_time");
/// Low-pass coefficient for the gravity channel, in `[0, 1)`.
pub const GRAVITY_FILTER_COEFFICIENT: Key<f32> = Key::new("gravity_filter");
/// Low-pass coefficient for the magnetic channel, in `[0, 1)`.
pub const MAGNETIC_FILTER_COEFFICIENT: Key<f32> = Key::new("magnetic_filter");
/// Effective camera field of view published by the preview sizing.
pub const FIELD_OF_VIEW: Key<FieldOfView> = Key::new("view_angles");
/// Weight of the aspect-ratio mismatch when grading preview sizes. Zero picks by area only.
pub const ASPECT_RATIO_WEIGHT: Key<f32> = Key::new("aspect_ratio_opt");

/// Opaque handle returned by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Deliver<T> = Arc<dyn Fn(&'static str, T, T) + Send + Sync>;

struct Subscriber<T> {
    id: SubscriptionId,
    deliver: Deliver<T>,
}

struct Parameter<T: Copy> {
    value: AtomicCell<T>,
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

trait ErasedParameter: Send + Sync {
    fn subscriber_count(&self) -> usize;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Copy + Send + Sync + 'static> ErasedParameter for Parameter<T> {
    fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cross-thread parameter store with change notification.
#[derive(Default)]
pub struct ParameterBus {
    parameters: Mutex<HashMap<&'static str, Arc<dyn ErasedParameter>>>,
    next_id: AtomicU64,
}

impl ParameterBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup<T: Copy + Send + Sync + 'static>(&self, key: Key<T>) -> Result<Arc<Parameter<T>>> {
        let erased = lock(&self.parameters)
            .get(key.name)
            .cloned()
            .ok_or(ArError::KeyNotFound(key.name))?;
        erased
            .into_any()
            .downcast::<Parameter<T>>()
            .map_err(|_| ArError::TypeMismatch { key: key.name })
    }

    /// Overwrite the value, creating the parameter if needed, and notify subscribers.
    ///
    /// Inline subscribers run on the calling thread before this returns.
    pub fn set<T: Copy + Send + Sync + 'static>(&self, key: Key<T>, value: T) -> Result<()> {
        let parameter = {
            let mut parameters = lock(&self.parameters);
            let existing = parameters.get(key.name).cloned();
            match existing {
                Some(existing) => existing,
                None => {
                    parameters.insert(
                        key.name,
                        Arc::new(Parameter {
                            value: AtomicCell::new(value),
                            subscribers: Mutex::new(Vec::new()),
                        }),
                    );
                    log::debug!("Parameter {} created", key.name);
                    return Ok(());
                }
            }
        };
        let parameter = parameter
            .into_any()
            .downcast::<Parameter<T>>()
            .map_err(|_| ArError::TypeMismatch { key: key.name })?;

        let old = parameter.value.swap(value);
        let deliveries: Vec<Deliver<T>> = lock(&parameter.subscribers)
            .iter()
            .map(|s| Arc::clone(&s.deliver))
            .collect();

        for deliver in deliveries {
            deliver(key.name, value, old);
        }
        Ok(())
    }

    pub fn get<T: Copy + Send + Sync + 'static>(&self, key: Key<T>) -> Result<T> {
        Ok(self.lookup(key)?.value.load())
    }

    pub fn contains<T>(&self, key: Key<T>) -> bool {
        lock(&self.parameters).contains_key(key.name)
    }

    /// Subscribe with synchronous delivery on the writer's thread.
    ///
    /// The callback receives `(key, new, old)` and must not block.
    pub fn subscribe<T, F>(&self, key: Key<T>, callback: F) -> Result<SubscriptionId>
    where
        T: Copy + Send + Sync + 'static,
        F: Fn(&'static str, T, T) + Send + Sync + 'static,
    {
        self.attach(key, Arc::new(callback))
    }

    /// Subscribe with delivery marshalled onto a worker's task queue, where the
    /// callback gets exclusive access to that worker's state.
    pub fn subscribe_on<T, S, F>(
        &self,
        key: Key<T>,
        queue: &TaskQueue<S>,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        T: Copy + Send + Sync + 'static,
        S: 'static,
        F: Fn(&mut S, &'static str, T, T) + Send + Sync + 'static,
    {
        let queue = queue.clone();
        let callback = Arc::new(callback);
        self.attach(
            key,
            Arc::new(move |name: &'static str, new: T, old: T| {
                let callback = Arc::clone(&callback);
                if !queue.post(move |state: &mut S| callback(state, name, new, old)) {
                    log::debug!("Dropped {} notification: target queue closed", name);
                }
            }),
        )
    }

    fn attach<T: Copy + Send + Sync + 'static>(
        &self,
        key: Key<T>,
        deliver: Deliver<T>,
    ) -> Result<SubscriptionId> {
        let parameter = self.lookup(key)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&parameter.subscribers).push(Subscriber { id, deliver });
        log::trace!("Subscribed {:?} to {}", id, key.name);
        Ok(id)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe<T: Copy + Send + Sync + 'static>(
        &self,
        key: Key<T>,
        id: SubscriptionId,
    ) -> bool {
        let Ok(parameter) = self.lookup(key) else {
            return false;
        };
        let mut subscribers = lock(&parameter.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count<T: Copy + Send + Sync + 'static>(&self, key: Key<T>) -> usize {
        self.lookup(key)
            .map(|p| lock(&p.subscribers).len())
            .unwrap_or(0)
    }

    /// Subscriptions across every parameter.
    pub fn total_subscribers(&self) -> usize {
        let parameters: Vec<_> = lock(&self.parameters).values().cloned().collect();
        parameters.iter().map(|p| p.subscriber_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task_queue;

    const COUNT: Key<u32> = Key::new("count");

    #[test]
    fn test_get_missing_key() {
        let bus = ParameterBus::new();
        assert!(matches!(bus.get(COUNT), Err(ArError::KeyNotFound("count"))));
    }

    #[test]
    fn test_subscribe_missing_key() {
        let bus = ParameterBus::new();
        let result = bus.subscribe(COUNT, |_, _, _| {});
        assert!(matches!(result, Err(ArError::KeyNotFound(_))));
    }

    #[test]
    fn test_set_then_get() {
        let bus = ParameterBus::new();
        bus.set(COUNT, 3).unwrap();
        assert_eq!(bus.get(COUNT).unwrap(), 3);
        bus.set(COUNT, 4).unwrap();
        assert_eq!(bus.get(COUNT).unwrap(), 4);
        assert!(bus.contains(COUNT));
    }

    #[test]
    fn test_type_mismatch() {
        let bus = ParameterBus::new();
        bus.set(COUNT, 1).unwrap();
        let wrong: Key<f32> = Key::new("count");
        assert!(matches!(bus.get(wrong), Err(ArError::TypeMismatch { .. })));
        assert!(bus.set(wrong, 1.0).is_err());
    }

    #[test]
    fn test_inline_delivery_new_and_old() {
        let bus = ParameterBus::new();
        bus.set(COUNT, 1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(COUNT, move |key, new, old| {
            sink.lock().unwrap().push((key, new, old));
        })
        .unwrap();
        bus.set(COUNT, 2).unwrap();
        bus.set(COUNT, 5).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("count", 2, 1), ("count", 5, 2)]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = ParameterBus::new();
        bus.set(COUNT, 0).unwrap();
        let id = bus.subscribe(COUNT, |_, _, _| {}).unwrap();
        assert_eq!(bus.subscriber_count(COUNT), 1);
        assert!(bus.unsubscribe(COUNT, id));
        assert!(!bus.unsubscribe(COUNT, id));
        assert_eq!(bus.subscriber_count(COUNT), 0);
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn test_callback_may_touch_bus() {
        let bus = Arc::new(ParameterBus::new());
        bus.set(COUNT, 0).unwrap();
        let inner = Arc::clone(&bus);
        bus.subscribe(COUNT, move |_, new, _| {
            assert_eq!(inner.get(COUNT).unwrap(), new);
        })
        .unwrap();
        bus.set(COUNT, 9).unwrap();
    }

    #[test]
    fn test_queued_delivery_runs_on_worker() {
        let bus = ParameterBus::new();
        bus.set(COUNT, 0).unwrap();
        let (queue, looper) = task_queue::<Vec<(u32, u32)>>();
        let worker = std::thread::spawn(move || {
            let mut received = Vec::new();
            looper.run(&mut received);
            received
        });
        bus.subscribe_on(COUNT, &queue, |received: &mut Vec<(u32, u32)>, _, new, old| {
            received.push((new, old));
        })
        .unwrap();
        bus.set(COUNT, 7).unwrap();
        bus.set(COUNT, 8).unwrap();
        queue.quit();
        assert_eq!(worker.join().unwrap(), vec![(7, 0), (8, 7)]);
    }
}
