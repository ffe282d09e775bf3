//! State and sensor sources: the two node kinds with no upstream dependencies of their own.
//!
//! A **state** is a plain mutable cell. A **sensor** is a state whose value arrives from the
//! outside world instead of from `set`/`update` calls; its `start` callback is invoked lazily the
//! first time a sink subscribes, and its teardown runs when the last sink disconnects.

use std::any::Any;
use std::marker::PhantomData;

use crate::error::{CoreError, CoreResult};
use crate::node::{EqualsFn, GuardFn, NodeId, NodeKind, ReactiveNode, SensorData, StateData, StopFn};
use crate::root::Root;

/// Options accepted by [`create_state`].
pub struct StateOptions<T> {
    /// Gates change propagation: a `set`/`update` whose new value is `equals` to the old one does
    /// not mark dependents stale. Defaults to always-changed (no equality check) when `None`.
    pub equals: Option<EqualsFn>,
    /// Rejects a value outright (surfacing [`CoreError::InvalidSignalValue`]) instead of
    /// committing it.
    pub guard: Option<GuardFn>,
    /// Lifecycle hook invoked the first time a sink subscribes to this state (the 0->1 sink
    /// transition), receiving the state itself so the callback can `set` into it (e.g. to wire up
    /// a timer or a foreign event source). Must return a teardown run on the 1->0 transition.
    pub watched: Option<Box<dyn FnMut(State<T>) -> StopFn>>,
    _private: PhantomData<T>,
}

impl<T> Default for StateOptions<T> {
    fn default() -> Self {
        Self {
            equals: None,
            guard: None,
            watched: None,
            _private: PhantomData,
        }
    }
}

impl<T: PartialEq + 'static> StateOptions<T> {
    /// Convenience constructor that wires up `PartialEq::eq` as the equality function.
    pub fn with_default_eq() -> Self {
        Self {
            equals: Some(Box::new(|a, b| {
                a.downcast_ref::<T>().unwrap() == b.downcast_ref::<T>().unwrap()
            })),
            guard: None,
            watched: None,
            _private: PhantomData,
        }
    }
}

/// A mutable source cell with no upstream dependencies.
///
/// Reading inside a running memo/task/effect links it as a dependency; writing propagates
/// staleness to every dependent, synchronously if outside a batch.
pub struct State<T: 'static> {
    pub(crate) id: NodeId,
    root: &'static Root,
    _phantom: PhantomData<T>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for State<T> {}

impl<T: 'static> State<T> {
    /// Reads the current value.
    ///
    /// # Example
    /// ```
    /// # use reactive_core::*;
    /// # create_root(|| {
    /// let count = create_state(0, StateOptions::default());
    /// assert_eq!(*count.get().unwrap(), 0);
    /// # });
    /// ```
    #[track_caller]
    pub fn get(self) -> CoreResult<std::rc::Rc<T>>
    where
        T: Clone,
    {
        self.root.link_to_active_sink(self.id);
        let nodes = self.root.nodes.borrow();
        let NodeKind::State(state) = &nodes[self.id].kind else {
            unreachable!("State::get on non-state node")
        };
        Ok(std::rc::Rc::new(
            state
                .value
                .downcast_ref::<T>()
                .expect("state value type mismatch")
                .clone(),
        ))
    }

    /// Replaces the value, propagating to dependents if it differs (per the `equals` option).
    #[track_caller]
    pub fn set(self, value: T) -> CoreResult<()> {
        self.update(move |_| value)
    }

    /// Replaces the value via `f(&old) -> new`, propagating to dependents if it differs.
    #[track_caller]
    pub fn update(self, f: impl FnOnce(&T) -> T) -> CoreResult<()> {
        let changed = {
            let mut nodes = self.root.nodes.borrow_mut();
            let NodeKind::State(state) = &mut nodes[self.id].kind else {
                unreachable!("State::update on non-state node")
            };
            let next = f(state
                .value
                .downcast_ref::<T>()
                .expect("state value type mismatch"));
            if let Some(guard) = &state.guard {
                if !guard(&next) {
                    return Err(CoreError::InvalidSignalValue);
                }
            }
            let equal = state
                .equals
                .as_ref()
                .map(|eq| eq(&state.value, &next))
                .unwrap_or(false);
            if !equal {
                state.value = Box::new(next);
            }
            !equal
        };
        if changed {
            self.root.propagate_from(self.id);
            self.root.flush_if_not_batching();
        }
        Ok(())
    }

    /// Disposes the node, running its owner-side cleanups and unlinking it from every dependent.
    pub fn dispose(self) {
        crate::node::NodeHandle(self.id).dispose();
    }
}

/// Creates a mutable source cell.
#[track_caller]
pub fn create_state<T: 'static>(initial: T, options: StateOptions<T>) -> State<T> {
    let root = Root::global();
    let mut watched = options.watched;
    let id = root.nodes.borrow_mut().insert(ReactiveNode::new(
        NodeKind::State(StateData {
            value: Box::new(initial),
            equals: options.equals,
            guard: options.guard,
            watched: watched.take().map(|mut w| {
                Box::new(move |id: NodeId| {
                    w(State {
                        id,
                        root: Root::global(),
                        _phantom: PhantomData,
                    })
                }) as Box<dyn FnMut(NodeId) -> StopFn>
            }),
            stop: None,
        }),
        root.current_owner.get(),
    ));
    root.adopt(id);
    State {
        id,
        root,
        _phantom: PhantomData,
    }
}

/// A setter handed to a sensor's `start` callback (and usable from anywhere else that callback
/// chooses to move it to, e.g. an async task or a foreign callback).
pub struct SensorSetter<T: 'static> {
    id: NodeId,
    root: &'static Root,
    _phantom: PhantomData<T>,
}

impl<T> Clone for SensorSetter<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for SensorSetter<T> {}

impl<T: 'static> SensorSetter<T> {
    /// Pushes a new value into the sensor, propagating to dependents if it differs.
    pub fn set(&self, value: T) {
        let changed = {
            let mut nodes = self.root.nodes.borrow_mut();
            let NodeKind::Sensor(sensor) = &mut nodes[self.id].kind else {
                return;
            };
            let next: Box<dyn Any> = Box::new(value);
            if let Some(guard) = &sensor.guard {
                if !guard(next.as_ref()) {
                    return;
                }
            }
            let equal = sensor
                .value
                .as_deref()
                .zip(sensor.equals.as_ref())
                .map(|(old, eq)| eq(old, next.as_ref()))
                .unwrap_or(false);
            if !equal {
                sensor.value = Some(next);
            }
            !equal
        };
        if changed {
            self.root.propagate_from(self.id);
            self.root.flush_if_not_batching();
        }
    }
}

/// A source whose value arrives from outside the graph: `start` runs lazily on the first
/// subscription and its returned teardown runs when the last sink disconnects.
pub struct Sensor<T: 'static> {
    pub(crate) id: NodeId,
    root: &'static Root,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Sensor<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Sensor<T> {}

impl<T: 'static> Sensor<T> {
    /// Reads the current value, installing `start` if this is the first subscriber.
    ///
    /// Panics if read before `start` has ever produced a value (no reasonable default exists);
    /// this mirrors requiring `start` to call the setter synchronously if an immediate value is
    /// needed.
    #[track_caller]
    pub fn get(self) -> CoreResult<std::rc::Rc<T>>
    where
        T: Clone,
    {
        self.root.link_to_active_sink(self.id);
        let nodes = self.root.nodes.borrow();
        let NodeKind::Sensor(sensor) = &nodes[self.id].kind else {
            unreachable!("Sensor::get on non-sensor node")
        };
        let value = sensor
            .value
            .as_deref()
            .expect("sensor has no value yet: `start` has not produced one")
            .downcast_ref::<T>()
            .expect("sensor value type mismatch")
            .clone();
        Ok(std::rc::Rc::new(value))
    }

    pub fn dispose(self) {
        crate::node::NodeHandle(self.id).dispose();
    }
}

/// Options accepted by [`create_sensor`]; shares the equality/guard shape with [`StateOptions`].
pub struct SensorOptions<T> {
    pub equals: Option<EqualsFn>,
    pub guard: Option<GuardFn>,
    _private: PhantomData<T>,
}

impl<T> Default for SensorOptions<T> {
    fn default() -> Self {
        Self {
            equals: None,
            guard: None,
            _private: PhantomData,
        }
    }
}

impl<T: PartialEq + 'static> SensorOptions<T> {
    pub fn with_default_eq() -> Self {
        Self {
            equals: Some(Box::new(|a, b| {
                a.downcast_ref::<T>().unwrap() == b.downcast_ref::<T>().unwrap()
            })),
            guard: None,
            _private: PhantomData,
        }
    }
}

/// Creates a lazily-activated external source.
///
/// `start` is invoked the first time a sink subscribes (i.e. the first `get` from inside a
/// running memo/task/effect), receiving a [`SensorSetter`] to push values with, and must return a
/// teardown invoked when the last subscriber disconnects.
#[track_caller]
pub fn create_sensor<T: 'static>(
    mut start: impl FnMut(SensorSetter<T>) -> StopFn + 'static,
    options: SensorOptions<T>,
) -> Sensor<T> {
    let root = Root::global();
    let id = root.nodes.borrow_mut().insert(ReactiveNode::new(
        NodeKind::Sensor(SensorData {
            value: None,
            equals: options.equals,
            guard: options.guard,
            start: Some(Box::new(move |id| {
                start(SensorSetter {
                    id,
                    root: Root::global(),
                    _phantom: PhantomData,
                })
            })),
            stop: None,
        }),
        root.current_owner.get(),
    ));
    root.adopt(id);
    Sensor {
        id,
        root,
        _phantom: PhantomData,
    }
}
