//! A fine-grained, push-pull reactive graph: signals, memos, asynchronous tasks and effects.
//!
//! Every value lives as one vertex in a graph owned by a root, created with [`create_root`].
//! Writes to a [`State`] or [`Sensor`] mark dependents CHECK/DIRTY eagerly;
//! [`Memo`]/[`Task`] recomputation and [`Effect`] re-runs happen lazily, on read or at flush time.
//!
//! ```
//! use reactive_core::*;
//!
//! let handle = create_root(|| {
//!     let count = create_state(1, StateOptions::with_default_eq());
//!     let doubled = create_memo(
//!         move |_: Option<&i32>| *count.get().unwrap() * 2,
//!         MemoOptions::with_default_eq(),
//!     );
//!     assert_eq!(*doubled.get().unwrap(), 2);
//!     count.set(5).unwrap();
//!     assert_eq!(*doubled.get().unwrap(), 10);
//! });
//! handle.dispose();
//! ```

#![warn(missing_docs)]

mod effect;
mod error;
mod memo;
mod node;
mod root;
mod scope;
mod signal;
mod task;

pub use effect::{create_effect, Effect};
pub use error::{ComputeError, CoreError, CoreResult};
pub use memo::{create_memo, Memo, MemoOptions};
pub use node::NodeHandle;
pub use root::{batch, create_root, on_cleanup, use_current_owner, RootHandle};
pub use scope::{create_scope, ScopeRegister};
pub use signal::{
    create_sensor, create_state, Sensor, SensorOptions, SensorSetter, State, StateOptions,
};
pub use task::{create_task, create_task_fallible, AbortSignal, Task, TaskOptions};

/// Opaque identifier for a vertex in the graph, exposed so the handle types above can be compared
/// and stored without pulling in their generic parameter.
pub use node::NodeId;
