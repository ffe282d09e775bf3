//! The error taxonomy surfaced at the public API boundary.
//!
//! Internally a memo or task's compute error is stored as a boxed [`std::error::Error`] on the
//! node so callers can propagate their own error types through `create_memo`/`create_task`
//! closures; [`CoreError`] itself is reserved for errors the graph raises about itself (cycles,
//! invalid arguments).

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// Errors raised by the reactive graph at the public API boundary.
///
/// `Clone` is implemented so that a memo/task can re-surface the same stored error on every
/// subsequent `get` without consuming it; the wrapped user error is kept behind an `Rc`.
#[derive(Error, Clone)]
pub enum CoreError {
    /// `refresh` reentered a node that is still RUNNING: a cyclic dependency.
    #[error("circular dependency detected while refreshing a {kind} node")]
    CircularDependency {
        /// The kind of node (`"memo"`, `"task"`, or `"effect"`) where the cycle was detected.
        kind: &'static str,
    },

    /// A `create_state`/`create_sensor`/`create_memo`/`create_task` initial value, or a value
    /// passed to `set`/`update`, was required to be present but was not.
    #[error("signal value must not be nullish")]
    NullishSignalValue,

    /// A `guard` callback rejected a value.
    #[error("value rejected by signal guard")]
    InvalidSignalValue,

    /// A callback passed to a factory or to `update` was missing, or was the wrong synchronicity
    /// (a sync function where an async one was required, or vice versa).
    #[error("invalid callback: {reason}")]
    InvalidCallback {
        /// Human-readable description of what was wrong with the callback.
        reason: &'static str,
    },

    /// A memo or task's compute function returned/threw a user error.
    #[error(transparent)]
    Compute(#[from] ComputeError),
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// A user error captured from a memo or task's compute function.
///
/// Wrapped in an `Rc` rather than cloned so that `Debug`/`Display` comparisons used to detect
/// "is this a new error, or the same one we already reported" are cheap, and so the original
/// error type does not need to implement `Clone`.
#[derive(Clone)]
pub struct ComputeError(pub(crate) Rc<dyn StdError + 'static>);

impl ComputeError {
    pub(crate) fn new(err: impl StdError + 'static) -> Self {
        Self(Rc::new(err))
    }

    /// Two compute errors are "the same" for the purposes of task re-propagation if their
    /// rendered messages match. Comparing rendered output is the closest analogue available
    /// without requiring `PartialEq` on arbitrary error types.
    pub(crate) fn same_as(&self, other: &ComputeError) -> bool {
        self.0.to_string() == other.0.to_string()
    }
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl StdError for ComputeError {}

/// Result alias used throughout the public API.
pub type CoreResult<T> = Result<T, CoreError>;
