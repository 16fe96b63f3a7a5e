use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    core::{self, dirty::Dirty, DepKey},
    effect::EffectInner,
};

/// A node that caches a derived value and can be forced to bring that cache
/// up to date during dirtiness resolution.
pub(crate) trait ComputedNode: 'static {
    fn refresh(&self);
}

struct DepSub {
    effect: Weak<EffectInner>,
    /// Generation of the effect at subscription time. A mismatch with the
    /// effect's current generation means the subscription is stale.
    generation: u64,
}

struct DepInner {
    /// Subscribers in insertion order, keyed by effect id.
    subs: RefCell<IndexMap<u64, DepSub>>,
    computed: RefCell<Option<Weak<dyn ComputedNode>>>,
    /// Called when the last subscriber leaves, so the owner (usually the
    /// dependency registry) can drop this dep.
    on_empty: RefCell<Option<Box<dyn Fn()>>>,
    label: Option<DepKey>,
}

/// The set of effects currently subscribed to one observable unit: a
/// `(target, key)` pair, a boxed reference cell, or a computed value.
#[derive(Clone)]
pub(crate) struct Dep(Rc<DepInner>);

impl Dep {
    pub fn new(label: Option<DepKey>) -> Self {
        Dep(Rc::new(DepInner {
            subs: RefCell::new(IndexMap::new()),
            computed: RefCell::new(None),
            on_empty: RefCell::new(None),
            label,
        }))
    }

    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn set_on_empty(&self, f: impl Fn() + 'static) {
        *self.0.on_empty.borrow_mut() = Some(Box::new(f));
    }

    pub fn set_computed(&self, node: Weak<dyn ComputedNode>) {
        *self.0.computed.borrow_mut() = Some(node);
    }

    pub fn computed(&self) -> Option<Rc<dyn ComputedNode>> {
        self.0.computed.borrow().as_ref()?.upgrade()
    }

    pub fn is_empty(&self) -> bool {
        self.0.subs.borrow().is_empty()
    }

    /// Subscribe the currently-active effect, if tracking is enabled.
    pub fn track_active(&self) {
        if let Some(effect) = core::active_tracking_effect() {
            self.track(&effect);
        }
    }

    /// Subscribe `effect`, deduplicated per run via the generation counter.
    ///
    /// A resubscription within the same run is a no-op. A new subscription
    /// takes the next slot of the effect's subscription list, releasing
    /// whatever different dep previously occupied it.
    pub fn track(&self, effect: &Rc<EffectInner>) {
        let id = effect.id();
        let generation = effect.generation();
        {
            let subs = self.0.subs.borrow();
            if subs.get(&id).map(|s| s.generation) == Some(generation) {
                return;
            }
        }
        self.0.subs.borrow_mut().insert(
            id,
            DepSub {
                effect: Rc::downgrade(effect),
                generation,
            },
        );
        if let Some(old) = effect.record_dep(self) {
            old.release_stale(id, generation);
        }
        effect.emit_track(self.0.label.as_ref());
    }

    /// Drop the subscription of `effect_id` unless it was renewed in the
    /// effect's current generation. Fires the empty callback when the last
    /// subscriber leaves.
    pub fn release_stale(&self, effect_id: u64, current_generation: u64) {
        let became_empty = {
            let mut subs = self.0.subs.borrow_mut();
            match subs.get(&effect_id) {
                Some(s) if s.generation != current_generation => {
                    subs.shift_remove(&effect_id);
                    subs.is_empty()
                }
                _ => false,
            }
        };
        if became_empty {
            self.notify_empty();
        }
    }

    fn notify_empty(&self) {
        let f = self.0.on_empty.borrow_mut().take();
        if let Some(f) = f {
            f();
            *self.0.on_empty.borrow_mut() = Some(f);
        }
    }

    fn purge(&self, dead: &[u64]) {
        if dead.is_empty() {
            return;
        }
        let became_empty = {
            let mut subs = self.0.subs.borrow_mut();
            for id in dead {
                subs.shift_remove(id);
            }
            subs.is_empty()
        };
        if became_empty {
            self.notify_empty();
        }
    }
}

/// Invalidate every current subscriber of `dep` at `level`.
///
/// Two passes over a snapshot of the membership, so subscriptions mutated by
/// the callbacks never observe a partially-updated dep: the first raises
/// dirtiness (notifying each effect's trigger hook on the clean-to-dirty
/// transition), the second enqueues pending schedulers. The whole call runs
/// under a scheduling pause; the queue drains when the outermost pause ends.
pub(crate) fn trigger_effects(dep: &Dep, level: Dirty) {
    let _batch = core::pause_scheduling();
    let subs: Vec<(u64, u64, Weak<EffectInner>)> = dep
        .0
        .subs
        .borrow()
        .iter()
        .map(|(id, s)| (*id, s.generation, s.effect.clone()))
        .collect();
    let mut dead = Vec::new();
    for (id, generation, weak) in &subs {
        let Some(effect) = weak.upgrade() else {
            dead.push(*id);
            continue;
        };
        if effect.generation() != *generation {
            continue;
        }
        effect.raise(level, dep.0.label.as_ref());
    }
    for (_, generation, weak) in &subs {
        let Some(effect) = weak.upgrade() else {
            continue;
        };
        if effect.generation() != *generation {
            continue;
        }
        effect.try_schedule();
    }
    dep.purge(&dead);
}
