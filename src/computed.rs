use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;

use crate::{
    core::dirty::Dirty,
    dep::{trigger_effects, ComputedNode, Dep},
    effect::{EffectInner, EffectOptions, SchedulerKind},
};

#[cfg(test)]
mod tests;

struct ComputedInner<T: 'static> {
    effect: Rc<EffectInner>,
    value: RefCell<Option<T>>,
    /// Set when the latest recomputation produced a different value;
    /// consumed by [`ComputedNode::refresh`] to escalate subscribers.
    changed: Cell<bool>,
    dep: Dep,
}

/// A lazily cached derived value.
///
/// The getter runs only when the cache is read while possibly stale.
/// Subscribers of a computed are invalidated tentatively
/// (`MaybeDirty`) when any of its own dependencies changes; whether they
/// actually re-run is decided later by recomputing and comparing.
#[derive_ex(Clone, bound())]
pub struct Computed<T: 'static>(Rc<ComputedInner<T>>);

/// Creates a computed value from `getter`.
///
/// Nothing runs until the first read. Reading a computed inside its own
/// getter panics, as does any longer cycle on its first evaluation; a cycle
/// that only forms during invalidation resolves to the cached value.
pub fn computed<T: PartialEq + 'static>(mut getter: impl FnMut() -> T + 'static) -> Computed<T> {
    let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
        let weak_f = weak.clone();
        let effect = EffectInner::new_raw(
            Box::new(move || {
                let Some(inner) = weak_f.upgrade() else {
                    return;
                };
                let value = getter();
                let changed = match &*inner.value.borrow() {
                    Some(old) => *old != value,
                    None => true,
                };
                if changed {
                    inner.changed.set(true);
                }
                *inner.value.borrow_mut() = Some(value);
            }),
            SchedulerKind::None,
            false,
            &mut EffectOptions::default(),
        );
        ComputedInner {
            effect,
            value: RefCell::new(None),
            changed: Cell::new(false),
            dep: Dep::new(None),
        }
    });
    inner
        .dep
        .set_computed(Rc::downgrade(&inner) as Weak<dyn ComputedNode>);
    let weak = Rc::downgrade(&inner);
    inner.effect.set_trigger_hook(move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        // subscribers only learn the value MIGHT have changed; they
        // recompute through refresh before deciding to re-run
        let level = if inner.effect.dirty_level() == Dirty::MaybeDirtyComputed {
            Dirty::MaybeDirtyComputed
        } else {
            Dirty::MaybeDirty
        };
        trigger_effects(&inner.dep, level);
    });
    Computed(inner)
}

impl<T: PartialEq + 'static> ComputedNode for ComputedInner<T> {
    fn refresh(&self) {
        if self.effect.running() {
            // re-entered from our own getter; leave the cycle to the reader
            return;
        }
        let never_ran = self.value.borrow().is_none();
        if self.effect.resolve_dirty() || never_ran {
            self.effect.run();
            if self.changed.replace(false) {
                trigger_effects(&self.dep, Dirty::Dirty);
            }
        }
    }
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Reads the current value, recomputing first if it may be stale.
    /// Subscribes the active effect.
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.0.refresh();
        self.0.dep.track_active();
        if self.0.effect.dirty_level() >= Dirty::MaybeDirtyComputed {
            // the recomputation itself re-dirtied this computed (a getter
            // with side effects); let subscribers know tentatively
            trigger_effects(&self.0.dep, Dirty::MaybeDirtyComputed);
        }
        let value = self.0.value.borrow();
        f(value.as_ref().expect("detect cyclic dependency"))
    }

    /// Reads a clone of the current value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Untracked read of whatever is cached, without recomputing. `None`
    /// before the first evaluation.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.0.value.borrow().clone()
    }

    /// Whether a read right now would recompute.
    pub fn is_dirty(&self) -> bool {
        self.0.effect.dirty_level() != Dirty::Clean
    }

    /// Detaches the computed from its dependencies. Subsequent reads
    /// return the last cached value without ever recomputing.
    pub fn stop(&self) {
        self.0.effect.stop();
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.0.value.try_borrow() {
            Ok(v) => f.debug_tuple("Computed").field(&*v).finish(),
            Err(_) => f.write_str("Computed(<borrowed>)"),
        }
    }
}
