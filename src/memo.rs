//! Memos: synchronous derivations, both sink (of their sources) and source (of their sinks).

use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::CoreResult;
use crate::node::{EqualsFn, GuardFn, MemoData, NodeId, NodeKind, ReactiveNode};
use crate::root::Root;

/// Options accepted by [`create_memo`].
pub struct MemoOptions<T> {
    /// Seed treated as the "previous value" on the very first recompute.
    pub value: Option<T>,
    /// Gates change propagation to downstream sinks.
    pub equals: Option<EqualsFn>,
    /// Rejects a recomputed value outright, surfacing [`CoreError::InvalidSignalValue`] from
    /// `get` instead of committing it.
    pub guard: Option<GuardFn>,
}

impl<T> Default for MemoOptions<T> {
    fn default() -> Self {
        Self {
            value: None,
            equals: None,
            guard: None,
        }
    }
}

impl<T: PartialEq + 'static> MemoOptions<T> {
    /// Convenience constructor that wires up `PartialEq::eq` as the equality function.
    pub fn with_default_eq() -> Self {
        Self {
            value: None,
            equals: Some(Box::new(|a, b| {
                a.downcast_ref::<T>().unwrap() == b.downcast_ref::<T>().unwrap()
            })),
            guard: None,
        }
    }
}

/// A synchronous derivation over other nodes, itself readable as a source.
///
/// Created DIRTY with a placeholder value; the first `get` triggers recompute, and subsequent
/// reads either return the cached value or refresh first, per the CHECK/DIRTY flags.
pub struct Memo<T: 'static> {
    pub(crate) id: NodeId,
    root: &'static Root,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Memo<T> {}

impl<T: 'static> Memo<T> {
    /// Links this memo as a dependency of the active sink (if any), refreshes it, and returns the
    /// cached value — re-throwing a stored compute error if the last recompute failed.
    ///
    /// # Example
    /// ```
    /// # use reactive_core::*;
    /// # create_root(|| {
    /// let a = create_state(1, StateOptions::default());
    /// let double = create_memo(move |_: Option<&i32>| *a.get().unwrap() * 2, MemoOptions::with_default_eq());
    /// assert_eq!(*double.get().unwrap(), 2);
    /// a.set(2).unwrap();
    /// assert_eq!(*double.get().unwrap(), 4);
    /// # });
    /// ```
    #[track_caller]
    pub fn get(self) -> CoreResult<Rc<T>>
    where
        T: Clone,
    {
        self.root.link_to_active_sink(self.id);
        self.root.refresh(self.id)?;
        let nodes = self.root.nodes.borrow();
        let NodeKind::Memo(memo) = &nodes[self.id].kind else {
            unreachable!("Memo::get on non-memo node")
        };
        if let Some(err) = &memo.error {
            return Err(err.clone());
        }
        let value = memo
            .value
            .as_ref()
            .expect("memo value missing after refresh")
            .downcast_ref::<T>()
            .expect("memo value type mismatch")
            .clone();
        Ok(Rc::new(value))
    }

    pub fn dispose(self) {
        crate::node::NodeHandle(self.id).dispose();
    }
}

/// Creates a synchronous derivation.
///
/// `f` receives the previous value (`None` on the first run, or if `options.value` seeded one,
/// `Some` of it) and must return the new one. Reading a dependency inside `f` installs an edge
/// that is re-diffed on every recompute.
#[track_caller]
pub fn create_memo<T: 'static>(
    mut f: impl FnMut(Option<&T>) -> T + 'static,
    options: MemoOptions<T>,
) -> Memo<T> {
    let root = Root::global();
    let parent = root.current_owner.get();
    let id = root.nodes.borrow_mut().insert(ReactiveNode::new(
        NodeKind::Memo(MemoData {
            f: Box::new(move |prior| {
                let prior = prior.map(|p| p.downcast_ref::<T>().unwrap());
                Box::new(f(prior))
            }),
            value: options.value.map(|v| Box::new(v) as Box<dyn std::any::Any>),
            equals: options.equals,
            guard: options.guard,
            error: None,
            flags: crate::node::Flags::dirty(),
        }),
        parent,
    ));
    root.adopt(id);
    Memo {
        id,
        root,
        _phantom: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use crate::root::create_root;
    use crate::signal::{create_state, StateOptions};

    use super::*;

    #[test]
    fn memo_recomputes_on_change() {
        create_root(|| {
            let a = create_state(1, StateOptions::with_default_eq());
            let double = create_memo(
                move |_: Option<&i32>| *a.get().unwrap() * 2,
                MemoOptions::with_default_eq(),
            );
            assert_eq!(*double.get().unwrap(), 2);
            a.set(5).unwrap();
            assert_eq!(*double.get().unwrap(), 10);
        })
        .dispose();
    }

    #[test]
    fn memo_lazy_pull_runs_at_most_once_per_get() {
        use std::cell::Cell;
        use std::rc::Rc;

        create_root(|| {
            let calls = Rc::new(Cell::new(0));
            let calls2 = calls.clone();
            let a = create_state(1, StateOptions::with_default_eq());
            let doubled = create_memo(
                move |_: Option<&i32>| {
                    calls2.set(calls2.get() + 1);
                    *a.get().unwrap() * 2
                },
                MemoOptions::with_default_eq(),
            );
            doubled.get().unwrap();
            assert_eq!(calls.get(), 1);
            a.set(2).unwrap();
            // No downstream effect: the memo does not recompute until read again.
            a.set(3).unwrap();
            assert_eq!(calls.get(), 1);
            doubled.get().unwrap();
            assert_eq!(calls.get(), 2);
        })
        .dispose();
    }

    #[test]
    fn memo_error_recovery() {
        create_root(|| {
            let a = create_state(0, StateOptions::with_default_eq());
            let m = create_memo(
                move |_: Option<&i32>| {
                    let v = *a.get().unwrap();
                    if v == 1 {
                        panic!("boom");
                    }
                    v
                },
                MemoOptions::with_default_eq(),
            );
            assert_eq!(*m.get().unwrap(), 0);
            a.set(1).unwrap();
            assert!(m.get().is_err());
            a.set(2).unwrap();
            assert_eq!(*m.get().unwrap(), 2);
        })
        .dispose();
    }

    #[test]
    fn diamond_recomputes_each_memo_once() {
        use std::cell::Cell;
        use std::rc::Rc;

        create_root(|| {
            let b_calls = Rc::new(Cell::new(0));
            let c_calls = Rc::new(Cell::new(0));
            let d_calls = Rc::new(Cell::new(0));
            let effect_calls = Rc::new(Cell::new(0));
            let last_seen = Rc::new(Cell::new(0));

            let a = create_state(4, StateOptions::with_default_eq());

            let b_calls2 = b_calls.clone();
            let b = create_memo(
                move |_: Option<&i32>| {
                    b_calls2.set(b_calls2.get() + 1);
                    *a.get().unwrap() * 2
                },
                MemoOptions::with_default_eq(),
            );

            let c_calls2 = c_calls.clone();
            let c = create_memo(
                move |_: Option<&i32>| {
                    c_calls2.set(c_calls2.get() + 1);
                    *a.get().unwrap() + 1
                },
                MemoOptions::with_default_eq(),
            );

            let d_calls2 = d_calls.clone();
            let d = create_memo(
                move |_: Option<&i32>| {
                    d_calls2.set(d_calls2.get() + 1);
                    *b.get().unwrap() + *c.get().unwrap()
                },
                MemoOptions::with_default_eq(),
            );

            let effect_calls2 = effect_calls.clone();
            let last_seen2 = last_seen.clone();
            let _e = crate::effect::create_effect(move || {
                effect_calls2.set(effect_calls2.get() + 1);
                last_seen2.set(*d.get().unwrap());
                None
            });

            assert_eq!(d_calls.get(), 1);
            assert_eq!(effect_calls.get(), 1);
            assert_eq!(last_seen.get(), 13); // b=8, c=5

            a.set(5).unwrap();

            assert_eq!(d_calls.get(), 2, "d should recompute exactly once");
            assert_eq!(effect_calls.get(), 2, "effect should run exactly once");
            assert_eq!(last_seen.get(), 16); // b=10, c=6
        })
        .dispose();
    }
}
