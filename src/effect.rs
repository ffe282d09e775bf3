//! Effects: sink-only nodes that own scoped cleanups and are the terminal consumers driving
//! recompute of everything upstream.
//!
//! An effect runs once immediately at creation (installing its first edges) and thereafter on
//! every flush cycle where it has been flagged DIRTY.

use crate::node::{EffectData, NodeHandle, NodeId, NodeKind, ReactiveNode};
use crate::root::Root;

/// A disposable side effect.
///
/// The handle returned by [`create_effect`] is write-only from the outside except for disposal —
/// Everything else about the effect (its sources, its cleanup) is internal bookkeeping.
#[derive(Clone, Copy)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    /// Disposes the effect: runs its cleanup (if any) and ensures it never runs again.
    pub fn dispose(self) {
        NodeHandle(self.id).dispose();
    }
}

/// Creates and immediately runs a side effect.
///
/// `f` may return a cleanup closure, run immediately before the next re-run and on disposal. Runs
/// again on every flush cycle in which it is DIRTY, at most once per cycle.
///
/// # Example
/// ```
/// # use reactive_core::*;
/// # create_root(|| {
/// let count = create_state(0, StateOptions::with_default_eq());
/// let seen = create_state(-1, StateOptions::with_default_eq());
/// create_effect(move || {
///     seen.set(*count.get().unwrap()).unwrap();
///     None
/// });
/// assert_eq!(*seen.get().unwrap(), 0);
/// count.set(1).unwrap();
/// assert_eq!(*seen.get().unwrap(), 1);
/// # });
/// ```
#[track_caller]
pub fn create_effect(mut f: impl FnMut() -> Option<Box<dyn FnOnce()>> + 'static) -> Effect {
    let root = Root::global();
    let parent = root.current_owner.get();
    let id = root.nodes.borrow_mut().insert(ReactiveNode::new(
        NodeKind::Effect(EffectData {
            f: Some(Box::new(move || f())),
            flags: crate::node::Flags::dirty(),
        }),
        parent,
    ));
    root.adopt(id);
    // Effects run once immediately to install their first edges.
    root.refresh(id).expect(
        "the first run of a freshly created effect cannot observe a cycle: it has no edges yet",
    );
    Effect { id }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::memo::create_memo;
    use crate::root::{batch, create_root, on_cleanup};
    use crate::signal::{create_state, StateOptions};

    use super::*;

    #[test]
    fn effect_runs_immediately_and_on_change() {
        create_root(|| {
            let count = create_state(0, StateOptions::with_default_eq());
            let log = Rc::new(RefCell::new(Vec::new()));
            let log2 = log.clone();
            let _e = create_effect(move || {
                log2.borrow_mut().push(*count.get().unwrap());
                None
            });
            assert_eq!(*log.borrow(), vec![0]);
            count.set(1).unwrap();
            assert_eq!(*log.borrow(), vec![0, 1]);
        })
        .dispose();
    }

    #[test]
    fn batched_writes_trigger_one_effect_run() {
        create_root(|| {
            let x = create_state(0, StateOptions::with_default_eq());
            let y = create_state(0, StateOptions::with_default_eq());
            let s = create_memo(
                move |_: Option<&i32>| *x.get().unwrap() + *y.get().unwrap(),
                crate::memo::MemoOptions::with_default_eq(),
            );
            let log = Rc::new(RefCell::new(Vec::new()));
            let log2 = log.clone();
            let _e = create_effect(move || {
                log2.borrow_mut().push(*s.get().unwrap());
                None
            });
            assert_eq!(*log.borrow(), vec![0]);

            batch(|| {
                x.set(1).unwrap();
                y.set(2).unwrap();
            });

            assert_eq!(*log.borrow(), vec![0, 3], "effect should run exactly once after the batch");
        })
        .dispose();
    }

    #[test]
    fn scoped_cleanup_runs_on_dispose_and_stops_tracking() {
        create_root(|| {
            let count = create_state(0, StateOptions::with_default_eq());
            let cleaned = Rc::new(Cell::new(0));
            let cleaned2 = cleaned.clone();

            let (_, dispose) = crate::scope::create_scope(move |_| {
                create_effect(move || {
                    count.get().unwrap();
                    let cleaned3 = cleaned2.clone();
                    Some(Box::new(move || cleaned3.set(cleaned3.get() + 1)))
                });
            });

            assert_eq!(cleaned.get(), 0);
            dispose();
            assert_eq!(cleaned.get(), 1, "cleanup should run exactly once on dispose");

            count.set(1).unwrap();
            assert_eq!(cleaned.get(), 1, "disposed effect must not re-run or re-clean");
        })
        .dispose();
    }

    #[test]
    fn cleanup_runs_before_each_rerun() {
        create_root(|| {
            let trigger = create_state(0, StateOptions::with_default_eq());
            let cleanups = Rc::new(Cell::new(0));
            let cleanups2 = cleanups.clone();
            let _e = create_effect(move || {
                trigger.get().unwrap();
                let c = cleanups2.clone();
                on_cleanup(move || c.set(c.get() + 1));
                None
            });
            assert_eq!(cleanups.get(), 0);
            trigger.set(1).unwrap();
            assert_eq!(cleanups.get(), 1);
            trigger.set(2).unwrap();
            assert_eq!(cleanups.get(), 2);
        })
        .dispose();
    }
}
