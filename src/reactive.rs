use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    core::{
        dirty::TriggerKind, pause_scheduling, pause_tracking, track_target, trigger_target,
        DepKey,
    },
    value::{RawTarget, Value},
};


pub(crate) struct ViewInner {
    raw: RawTarget,
    /// For a readonly view layered over a mutable one: reads delegate to
    /// the base so they keep tracking through it.
    base: Option<View>,
    readonly: bool,
    shallow: bool,
}

/// A tracked window onto a [`RawMap`](crate::RawMap) or
/// [`RawList`](crate::RawList).
///
/// Reads through a view subscribe the active effect to the key they touch;
/// writes notify subscribers of exactly that key (plus the iteration
/// dependency when the container's shape changes). Views are cached per
/// target and mode, so wrapping the same container twice yields the same
/// handle.
#[derive(Clone)]
pub struct View(pub(crate) Rc<ViewInner>);

thread_local! {
    /// One cache per wrap mode, keyed by target address. Entries are weak;
    /// the cache is swept opportunistically once it grows.
    static VIEWS: RefCell<[HashMap<usize, Weak<ViewInner>>; 4]> = Default::default();
}

fn mode_index(readonly: bool, shallow: bool) -> usize {
    (readonly as usize) * 2 + (shallow as usize)
}

fn cached_view(key: usize, readonly: bool, shallow: bool, make: impl FnOnce() -> ViewInner) -> View {
    VIEWS.with(|caches| {
        let mut caches = caches.borrow_mut();
        let cache = &mut caches[mode_index(readonly, shallow)];
        if let Some(inner) = cache.get(&key).and_then(Weak::upgrade) {
            return View(inner);
        }
        if cache.len() > 64 {
            cache.retain(|_, w| w.strong_count() > 0);
        }
        let inner = Rc::new(make());
        cache.insert(key, Rc::downgrade(&inner));
        View(inner)
    })
}

fn wrap(value: Value, readonly: bool, shallow: bool) -> Value {
    let raw = match &value {
        Value::Map(m) => RawTarget::Map(m.clone()),
        Value::List(l) => RawTarget::List(l.clone()),
        Value::View(v) => {
            // same mode, or a mutable wrap of an already-readonly view:
            // the existing view already provides the requested surface
            if v.0.readonly || !readonly {
                return value;
            }
            // readonly over a mutable view
            let key = Rc::as_ptr(&v.0) as *const () as usize;
            let v = v.clone();
            return Value::View(cached_view(key, readonly, shallow, move || ViewInner {
                raw: v.0.raw.clone(),
                base: Some(v),
                readonly: true,
                shallow,
            }));
        }
        _ => return value,
    };
    let key = raw.ptr_id();
    Value::View(cached_view(key, readonly, shallow, move || ViewInner {
        raw,
        base: None,
        readonly,
        shallow,
    }))
}

/// Wraps a map or list in a deep mutable view. Scalars and boxed
/// references pass through unchanged; wrapping an existing view of
/// compatible mode is a no-op.
pub fn reactive(value: impl Into<Value>) -> Value {
    wrap(value.into(), false, false)
}

/// Like [`reactive`], but nested containers read through the view come
/// back raw instead of wrapped.
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    wrap(value.into(), false, true)
}

/// Wraps a map or list in a deep readonly view. Over a mutable view this
/// composes: reads still track through the base, writes are rejected.
pub fn readonly(value: impl Into<Value>) -> Value {
    wrap(value.into(), true, false)
}

/// Readonly at the top level only; nested values come back as stored.
pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    wrap(value.into(), true, true)
}

/// Whether reads of `value` are tracked: a mutable view, or a readonly
/// view layered over one.
pub fn is_reactive(value: &Value) -> bool {
    match value {
        Value::View(v) => !v.0.readonly || v.0.base.is_some(),
        _ => false,
    }
}

pub fn is_readonly(value: &Value) -> bool {
    match value {
        Value::View(v) => v.0.readonly,
        Value::Ref(r) => r.is_readonly(),
        _ => false,
    }
}

pub fn is_shallow(value: &Value) -> bool {
    match value {
        Value::View(v) => v.0.shallow,
        _ => false,
    }
}

/// Unwraps a view back to the plain container it fronts. Everything else
/// is returned as-is.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::View(v) => v.raw_value(),
        other => other.clone(),
    }
}

impl View {
    pub fn is_readonly(&self) -> bool {
        self.0.readonly
    }
    pub fn is_shallow(&self) -> bool {
        self.0.shallow
    }
    pub fn is_list(&self) -> bool {
        self.0.raw.is_list()
    }

    /// The plain container behind this view.
    pub fn raw_value(&self) -> Value {
        match &self.0.raw {
            RawTarget::Map(m) => Value::Map(m.clone()),
            RawTarget::List(l) => Value::List(l.clone()),
        }
    }

    fn track(&self, key: DepKey) {
        if !self.0.readonly {
            track_target(&self.0.raw, key);
        }
    }

    /// Deep views hand nested containers back wrapped in the same mode.
    fn wrap_nested(&self, value: Value) -> Value {
        if self.0.shallow {
            return value;
        }
        match &value {
            Value::Map(_) | Value::List(_) => wrap(value, self.0.readonly, false),
            _ => value,
        }
    }

    /// Tracked map read. Boxed references unwrap through their own tracked
    /// read; nested containers come back wrapped for deep views.
    pub fn get(&self, key: &str) -> Value {
        if let Some(base) = &self.0.base {
            return self.wrap_nested(base.get(key));
        }
        let RawTarget::Map(m) = &self.0.raw else {
            return Value::Null;
        };
        self.track(DepKey::Prop(key.into()));
        let Some(value) = m.get(key) else {
            return Value::Null;
        };
        if self.0.shallow {
            return value;
        }
        if let Value::Ref(r) = &value {
            return r.get();
        }
        self.wrap_nested(value)
    }

    /// Tracked list element read. Unlike [`View::get`], boxed references
    /// stay boxed.
    pub fn get_index(&self, index: usize) -> Value {
        if let Some(base) = &self.0.base {
            return self.wrap_nested(base.get_index(index));
        }
        let RawTarget::List(l) = &self.0.raw else {
            return Value::Null;
        };
        self.track(DepKey::Index(index));
        match l.get(index) {
            Some(value) => self.wrap_nested(value),
            None => Value::Null,
        }
    }

    /// Tracked write of a map key.
    ///
    /// If the key currently holds a boxed reference and the new value is
    /// not one, the write rebinds through the box instead of replacing it;
    /// a readonly box rejects the rebind and `set` reports `false`. A write
    /// through a readonly view is a successful no-op that warns in dev
    /// builds.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        if self.0.readonly {
            self.warn_readonly("set");
            return true;
        }
        let RawTarget::Map(m) = &self.0.raw else {
            return true;
        };
        let mut value = value.into();
        let old = m.get(key);
        if !self.0.shallow {
            if !is_shallow(&value) && !is_readonly(&value) {
                value = to_raw(&value);
            }
            if let Some(Value::Ref(r)) = &old {
                if !matches!(value, Value::Ref(_)) {
                    return r.set(value);
                }
            }
        }
        m.insert(key, value.clone());
        match old {
            None => trigger_target(&self.0.raw, Some(DepKey::Prop(key.into())), TriggerKind::Add),
            Some(old) => {
                if !to_raw(&old).is_same(&to_raw(&value)) {
                    trigger_target(
                        &self.0.raw,
                        Some(DepKey::Prop(key.into())),
                        TriggerKind::Set,
                    );
                }
            }
        }
        true
    }

    /// Tracked write of a list element. Writing at or past the end grows
    /// the list (null-filling any gap) and notifies length subscribers.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) -> bool {
        if self.0.readonly {
            self.warn_readonly("set");
            return true;
        }
        let RawTarget::List(l) = &self.0.raw else {
            return true;
        };
        let mut value = value.into();
        if !self.0.shallow && !is_shallow(&value) && !is_readonly(&value) {
            value = to_raw(&value);
        }
        let len = l.len();
        if index < len {
            let old = {
                let mut items = l.0.borrow_mut();
                std::mem::replace(&mut items[index], value.clone())
            };
            if !to_raw(&old).is_same(&to_raw(&value)) {
                trigger_target(&self.0.raw, Some(DepKey::Index(index)), TriggerKind::Set);
            }
        } else {
            {
                let mut items = l.0.borrow_mut();
                items.resize(index, Value::Null);
                items.push(value);
            }
            trigger_target(&self.0.raw, Some(DepKey::Index(index)), TriggerKind::Add);
        }
        true
    }

    /// Removes a map key. Reports whether the key existed; removal through
    /// a readonly view is a successful no-op.
    pub fn delete(&self, key: &str) -> bool {
        if self.0.readonly {
            self.warn_readonly("delete");
            return true;
        }
        let RawTarget::Map(m) = &self.0.raw else {
            return false;
        };
        let existed = m.remove(key).is_some();
        if existed {
            trigger_target(
                &self.0.raw,
                Some(DepKey::Prop(key.into())),
                TriggerKind::Delete,
            );
        }
        existed
    }

    /// Tracked presence check.
    pub fn has(&self, key: &str) -> bool {
        if let Some(base) = &self.0.base {
            return base.has(key);
        }
        let RawTarget::Map(m) = &self.0.raw else {
            return false;
        };
        self.track(DepKey::Prop(key.into()));
        m.contains_key(key)
    }

    /// Identical to [`View::has`]; views have no delegation chain to skip.
    pub fn has_own(&self, key: &str) -> bool {
        self.has(key)
    }

    pub fn has_index(&self, index: usize) -> bool {
        if let Some(base) = &self.0.base {
            return base.has_index(index);
        }
        let RawTarget::List(l) = &self.0.raw else {
            return false;
        };
        self.track(DepKey::Index(index));
        index < l.len()
    }

    /// Tracked key iteration: subscribes to additions and removals.
    pub fn keys(&self) -> Vec<Rc<str>> {
        if let Some(base) = &self.0.base {
            return base.keys();
        }
        let RawTarget::Map(m) = &self.0.raw else {
            return Vec::new();
        };
        self.track(DepKey::Iterate);
        m.keys()
    }

    /// Tracked value iteration over a map.
    pub fn values(&self) -> Vec<Value> {
        if let Some(base) = &self.0.base {
            return base.values().into_iter().map(|v| self.wrap_nested(v)).collect();
        }
        let RawTarget::Map(m) = &self.0.raw else {
            return Vec::new();
        };
        self.track(DepKey::Iterate);
        let values: Vec<Value> = m.0.borrow().values().cloned().collect();
        values.into_iter().map(|v| self.wrap_nested(v)).collect()
    }

    /// Tracked length: the iteration dependency for lists, map entry count
    /// for maps.
    pub fn len(&self) -> usize {
        if let Some(base) = &self.0.base {
            return base.len();
        }
        match &self.0.raw {
            RawTarget::List(l) => {
                self.track(DepKey::Length);
                l.len()
            }
            RawTarget::Map(m) => {
                self.track(DepKey::Iterate);
                m.len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked snapshot of a list's elements.
    pub fn to_vec(&self) -> Vec<Value> {
        let len = self.len();
        (0..len).map(|i| self.get_index(i)).collect()
    }

    /// Replaces `delete_count` elements starting at `start` with `items`,
    /// returning the removed elements.
    ///
    /// Runs untracked and as one batch; every shifted position is notified
    /// as a plain write, and a length change is notified once at the
    /// boundary.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        if self.0.readonly {
            self.warn_readonly("splice");
            return Vec::new();
        }
        let RawTarget::List(l) = &self.0.raw else {
            return Vec::new();
        };
        let _untracked = pause_tracking();
        let _batch = pause_scheduling();
        let items: Vec<Value> = items
            .into_iter()
            .map(|v| {
                if !self.0.shallow && !is_shallow(&v) && !is_readonly(&v) {
                    to_raw(&v)
                } else {
                    v
                }
            })
            .collect();
        let (removed, old_len, new_len) = {
            let mut list = l.0.borrow_mut();
            let old_len = list.len();
            let start = start.min(old_len);
            let end = (start + delete_count).min(old_len);
            let removed: Vec<Value> = list.splice(start..end, items).collect();
            let new_len = list.len();
            (removed, old_len, new_len)
        };
        let start = start.min(old_len);
        for i in start..old_len.min(new_len) {
            trigger_target(&self.0.raw, Some(DepKey::Index(i)), TriggerKind::Set);
        }
        if new_len > old_len {
            for i in old_len..new_len {
                trigger_target(&self.0.raw, Some(DepKey::Index(i)), TriggerKind::Add);
            }
        } else if new_len < old_len {
            for i in new_len..old_len {
                trigger_target(&self.0.raw, Some(DepKey::Index(i)), TriggerKind::Delete);
            }
        }
        removed
    }

    pub fn push(&self, value: impl Into<Value>) {
        let len = self.untracked_len();
        self.splice(len, 0, [value.into()]);
    }

    pub fn pop(&self) -> Option<Value> {
        let len = self.untracked_len();
        if len == 0 {
            return None;
        }
        self.splice(len - 1, 1, []).pop()
    }

    pub fn shift(&self) -> Option<Value> {
        self.splice(0, 1, []).pop()
    }

    pub fn unshift(&self, value: impl Into<Value>) {
        self.splice(0, 0, [value.into()]);
    }

    /// Removes and returns the element at `index`.
    pub fn remove(&self, index: usize) -> Option<Value> {
        self.splice(index, 1, []).pop()
    }

    /// Removes every entry or element, invalidating all subscribers of the
    /// target in one batch.
    pub fn clear(&self) {
        if self.0.readonly {
            self.warn_readonly("clear");
            return;
        }
        let had_content = match &self.0.raw {
            RawTarget::Map(m) => {
                let mut m = m.0.borrow_mut();
                let had = !m.is_empty();
                m.clear();
                had
            }
            RawTarget::List(l) => {
                let mut l = l.0.borrow_mut();
                let had = !l.is_empty();
                l.clear();
                had
            }
        };
        if had_content {
            trigger_target(&self.0.raw, None, TriggerKind::Clear);
        }
    }

    fn untracked_len(&self) -> usize {
        match &self.0.raw {
            RawTarget::List(l) => l.len(),
            RawTarget::Map(m) => m.len(),
        }
    }

    /// Tracked search. Compares against the stored elements; if the needle
    /// is a view and nothing matched, retries with the needle unwrapped,
    /// so a wrapped handle still finds its raw container.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        self.search(needle, false)
    }

    pub fn last_index_of(&self, needle: &Value) -> Option<usize> {
        self.search(needle, true)
    }

    pub fn includes(&self, needle: &Value) -> bool {
        self.search(needle, false).is_some()
    }

    fn search(&self, needle: &Value, from_end: bool) -> Option<usize> {
        if let Some(base) = &self.0.base {
            return base.search(needle, from_end);
        }
        let RawTarget::List(l) = &self.0.raw else {
            return None;
        };
        self.track(DepKey::Length);
        let items = l.to_vec();
        if !self.0.readonly {
            for i in 0..items.len() {
                track_target(&self.0.raw, DepKey::Index(i));
            }
        }
        let find = |needle: &Value| {
            if from_end {
                items.iter().rposition(|v| v.is_same(needle))
            } else {
                items.iter().position(|v| v.is_same(needle))
            }
        };
        find(needle).or_else(|| {
            let raw = to_raw(needle);
            if raw.is_same(needle) {
                None
            } else {
                find(&raw)
            }
        })
    }

    fn warn_readonly(&self, op: &str) {
        #[cfg(debug_assertions)]
        tracing::warn!("{op} ignored: readonly view");
        #[cfg(not(debug_assertions))]
        let _ = op;
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut d = f.debug_struct("View");
        d.field("readonly", &self.0.readonly)
            .field("shallow", &self.0.shallow)
            .field("raw", &self.raw_value());
        d.finish()
    }
}
