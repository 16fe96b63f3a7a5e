use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    core::dirty::Dirty,
    dep::{trigger_effects, Dep},
    reactive::{reactive, to_raw, View},
};

#[cfg(test)]
mod tests;

/// A dynamically-typed value.
///
/// Containers (`Map`, `List`) and boxed references have shared-handle
/// semantics: cloning a `Value` clones the handle, not the contents.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Map(RawMap),
    List(RawList),
    /// A boxed single-value reference cell; see [`RefBox`].
    Ref(RefBox),
    /// A reactive view over a map or list; see [`View`].
    View(View),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_view(&self) -> Option<&View> {
        match self {
            Value::View(v) => Some(v),
            _ => None,
        }
    }

    /// Identity comparison in the sense change detection uses: content
    /// equality for scalars (`NaN` equals itself) and handle identity for
    /// containers, boxed references and views.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Value::Ref(a), Value::Ref(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Value::View(a), Value::View(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => fmt::Debug::fmt(b, f),
            Value::Int(i) => fmt::Debug::fmt(i, f),
            Value::Float(x) => fmt::Debug::fmt(x, f),
            Value::Str(s) => fmt::Debug::fmt(s, f),
            Value::Map(m) => match m.0.try_borrow() {
                Ok(m) => f.debug_map().entries(m.iter()).finish(),
                Err(_) => f.write_str("<borrowed>"),
            },
            Value::List(l) => match l.0.try_borrow() {
                Ok(l) => f.debug_list().entries(l.iter()).finish(),
                Err(_) => f.write_str("<borrowed>"),
            },
            Value::Ref(r) => match r.0.value.try_borrow() {
                Ok(v) => f.debug_tuple("Ref").field(&*v).finish(),
                Err(_) => f.write_str("Ref(<borrowed>)"),
            },
            Value::View(v) => fmt::Debug::fmt(v, f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}
impl From<RawMap> for Value {
    fn from(v: RawMap) -> Self {
        Value::Map(v)
    }
}
impl From<RawList> for Value {
    fn from(v: RawList) -> Self {
        Value::List(v)
    }
}
impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(v: Vec<V>) -> Self {
        Value::List(v.into_iter().collect())
    }
}
impl From<RefBox> for Value {
    fn from(v: RefBox) -> Self {
        Value::Ref(v)
    }
}
impl From<View> for Value {
    fn from(v: View) -> Self {
        Value::View(v)
    }
}

/// A plain, untracked string-keyed map. Reads and writes through these
/// accessors are invisible to effects; wrap the map with
/// [`reactive`](crate::reactive) for tracked access.
#[derive(Clone, Default)]
pub struct RawMap(pub(crate) Rc<RefCell<IndexMap<Rc<str>, Value>>>);

impl RawMap {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }
    pub fn insert(&self, key: impl Into<Rc<str>>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(key)
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.borrow().keys().cloned().collect()
    }
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl<K: Into<Rc<str>>, V: Into<Value>> FromIterator<(K, V)> for RawMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        RawMap(Rc::new(RefCell::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )))
    }
}

impl fmt::Debug for RawMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(m) => f.debug_map().entries(m.iter()).finish(),
            Err(_) => f.write_str("<borrowed>"),
        }
    }
}

/// A plain, untracked list. See [`RawMap`] for tracking notes.
#[derive(Clone, Default)]
pub struct RawList(pub(crate) Rc<RefCell<Vec<Value>>>);

impl RawList {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }
    pub fn push(&self, value: impl Into<Value>) {
        self.0.borrow_mut().push(value.into());
    }
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }
}

impl<V: Into<Value>> FromIterator<V> for RawList {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        RawList(Rc::new(RefCell::new(
            iter.into_iter().map(|v| v.into()).collect(),
        )))
    }
}

impl fmt::Debug for RawList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(l) => f.debug_list().entries(l.iter()).finish(),
            Err(_) => f.write_str("<borrowed>"),
        }
    }
}

struct RefBoxInner {
    value: RefCell<Value>,
    dep: Dep,
    readonly: bool,
    /// A shallow box stores assigned containers as-is instead of wrapping
    /// them reactively on read.
    shallow: bool,
}

/// A boxed single-value reference cell with its own dependency.
///
/// Reading through [`RefBox::get`] subscribes the active effect; writing a
/// different value through [`RefBox::set`] invalidates subscribers. A
/// container read from a deep box comes back reactively wrapped.
#[derive(Clone)]
pub struct RefBox(Rc<RefBoxInner>);

impl RefBox {
    pub fn new(value: impl Into<Value>) -> Self {
        Self::with_flags(value.into(), false, false)
    }
    pub fn new_shallow(value: impl Into<Value>) -> Self {
        Self::with_flags(value.into(), false, true)
    }
    pub fn new_readonly(value: impl Into<Value>) -> Self {
        Self::with_flags(value.into(), true, false)
    }
    fn with_flags(value: Value, readonly: bool, shallow: bool) -> Self {
        RefBox(Rc::new(RefBoxInner {
            value: RefCell::new(value),
            dep: Dep::new(None),
            readonly,
            shallow,
        }))
    }

    pub fn is_readonly(&self) -> bool {
        self.0.readonly
    }

    /// Tracked read.
    pub fn get(&self) -> Value {
        self.0.dep.track_active();
        let value = self.0.value.borrow().clone();
        if self.0.shallow {
            value
        } else {
            reactive(value)
        }
    }

    /// Untracked read of the stored value as-is.
    pub fn peek(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Tracked write. Returns whether the write was accepted; a readonly
    /// box rejects every write. An unchanged value neither stores nor
    /// invalidates.
    pub fn set(&self, value: impl Into<Value>) -> bool {
        if self.0.readonly {
            #[cfg(debug_assertions)]
            tracing::warn!("set ignored: readonly ref");
            return false;
        }
        let mut value = value.into();
        // a shallow or readonly view is stored as-is; unwrapping it would
        // discard the protection the caller asked for
        let direct = self.0.shallow
            || crate::reactive::is_shallow(&value)
            || crate::reactive::is_readonly(&value);
        if !direct {
            value = to_raw(&value);
        }
        {
            let current = self.0.value.borrow();
            if current.is_same(&value) {
                return true;
            }
        }
        *self.0.value.borrow_mut() = value;
        trigger_effects(&self.0.dep, Dirty::Dirty);
        true
    }
}

impl fmt::Debug for RefBox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.value.try_borrow() {
            Ok(v) => f.debug_tuple("RefBox").field(&*v).finish(),
            Err(_) => f.write_str("RefBox(<borrowed>)"),
        }
    }
}

/// A map or list handle, the unit the dependency registry keys by.
#[derive(Clone)]
pub(crate) enum RawTarget {
    Map(RawMap),
    List(RawList),
}

impl RawTarget {
    pub fn ptr_id(&self) -> usize {
        match self {
            RawTarget::Map(m) => Rc::as_ptr(&m.0) as *const () as usize,
            RawTarget::List(l) => Rc::as_ptr(&l.0) as *const () as usize,
        }
    }
    pub fn downgrade(&self) -> WeakTarget {
        match self {
            RawTarget::Map(m) => WeakTarget::Map(Rc::downgrade(&m.0)),
            RawTarget::List(l) => WeakTarget::List(Rc::downgrade(&l.0)),
        }
    }
    pub fn is_list(&self) -> bool {
        matches!(self, RawTarget::List(_))
    }
}

pub(crate) enum WeakTarget {
    Map(Weak<RefCell<IndexMap<Rc<str>, Value>>>),
    List(Weak<RefCell<Vec<Value>>>),
}

impl WeakTarget {
    /// Whether this weak handle still refers to a live allocation at
    /// `ptr`. A dead handle whose address was reused must not match.
    pub fn matches(&self, ptr: usize) -> bool {
        match self {
            WeakTarget::Map(w) => {
                w.strong_count() > 0 && w.as_ptr() as *const () as usize == ptr
            }
            WeakTarget::List(w) => {
                w.strong_count() > 0 && w.as_ptr() as *const () as usize == ptr
            }
        }
    }
}

mod serde_impls {
    use super::*;
    use serde::{
        de::{self, MapAccess, SeqAccess, Visitor},
        ser::{Error as _, SerializeMap, SerializeSeq},
        Deserialize, Deserializer, Serialize, Serializer,
    };

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Value::Null => serializer.serialize_unit(),
                Value::Bool(b) => serializer.serialize_bool(*b),
                Value::Int(i) => serializer.serialize_i64(*i),
                Value::Float(x) => serializer.serialize_f64(*x),
                Value::Str(s) => serializer.serialize_str(s),
                Value::Map(m) => m.serialize(serializer),
                Value::List(l) => l.serialize(serializer),
                Value::Ref(r) => match r.0.value.try_borrow() {
                    Ok(v) => v.serialize(serializer),
                    Err(_) => Err(S::Error::custom("borrowed")),
                },
                Value::View(v) => v.raw_value().serialize(serializer),
            }
        }
    }

    impl Serialize for RawMap {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self.0.try_borrow() {
                Ok(m) => {
                    let mut s = serializer.serialize_map(Some(m.len()))?;
                    for (k, v) in m.iter() {
                        s.serialize_entry(&**k, v)?;
                    }
                    s.end()
                }
                Err(_) => Err(S::Error::custom("borrowed")),
            }
        }
    }

    impl Serialize for RawList {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self.0.try_borrow() {
                Ok(l) => {
                    let mut s = serializer.serialize_seq(Some(l.len()))?;
                    for v in l.iter() {
                        s.serialize_element(v)?;
                    }
                    s.end()
                }
                Err(_) => Err(S::Error::custom("borrowed")),
            }
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct ValueVisitor;
            impl<'de> Visitor<'de> for ValueVisitor {
                type Value = Value;
                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.write_str("any value")
                }
                fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                    Ok(Value::Null)
                }
                fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                    Ok(Value::Null)
                }
                fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
                    Value::deserialize(d)
                }
                fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                    Ok(Value::Bool(v))
                }
                fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                    Ok(Value::Int(v))
                }
                fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                    if v <= i64::MAX as u64 {
                        Ok(Value::Int(v as i64))
                    } else {
                        Ok(Value::Float(v as f64))
                    }
                }
                fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                    Ok(Value::Float(v))
                }
                fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                    Ok(Value::str(v))
                }
                fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                    Ok(Value::Str(v.into()))
                }
                fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                    let mut items = Vec::new();
                    while let Some(v) = seq.next_element()? {
                        items.push(v);
                    }
                    Ok(Value::List(RawList(Rc::new(RefCell::new(items)))))
                }
                fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
                    let mut entries = IndexMap::new();
                    while let Some((k, v)) = map.next_entry::<String, Value>()? {
                        entries.insert(Rc::from(k), v);
                    }
                    Ok(Value::Map(RawMap(Rc::new(RefCell::new(entries)))))
                }
            }
            deserializer.deserialize_any(ValueVisitor)
        }
    }

    impl<'de> Deserialize<'de> for RawMap {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            match Value::deserialize(deserializer)? {
                Value::Map(m) => Ok(m),
                other => Err(de::Error::custom(format_args!(
                    "expected map, found {other:?}"
                ))),
            }
        }
    }

    impl<'de> Deserialize<'de> for RawList {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            match Value::deserialize(deserializer)? {
                Value::List(l) => Ok(l),
                other => Err(de::Error::custom(format_args!(
                    "expected list, found {other:?}"
                ))),
            }
        }
    }
}
