use assert_call::{call, CallRecorder};

use crate::{effect, reactive, RawList, RawMap, RefBox, Value};

#[test]
fn is_same_scalars() {
    assert!(Value::Null.is_same(&Value::Null));
    assert!(Value::Int(1).is_same(&Value::Int(1)));
    assert!(!Value::Int(1).is_same(&Value::Int(2)));
    assert!(Value::str("a").is_same(&Value::str("a")));
    assert!(!Value::Int(1).is_same(&Value::Float(1.0)));
}

#[test]
fn is_same_nan() {
    assert!(Value::Float(f64::NAN).is_same(&Value::Float(f64::NAN)));
    assert!(!Value::Float(f64::NAN).is_same(&Value::Float(0.0)));
}

#[test]
fn is_same_containers_by_identity() {
    let m: RawMap = [("a", 1)].into_iter().collect();
    let m2: RawMap = [("a", 1)].into_iter().collect();
    assert!(Value::Map(m.clone()).is_same(&Value::Map(m.clone())));
    assert!(!Value::Map(m).is_same(&Value::Map(m2)));

    let l: RawList = [1, 2].into_iter().collect();
    assert!(Value::List(l.clone()).is_same(&Value::List(l.clone())));
    assert!(!Value::List(l).is_same(&[1, 2].into_iter().collect::<RawList>().into()));
}

#[test]
fn raw_accessors_are_untracked() {
    let mut cr = CallRecorder::new();
    let m: RawMap = [("count", 0)].into_iter().collect();
    let m0 = m.clone();
    let _e = effect(move || {
        call!("{:?}", m0.get("count"));
    });
    cr.verify("Some(0)");

    m.insert("count", 1);
    cr.verify(());
}

#[test]
fn ref_get_set() {
    let r = RefBox::new(10);
    assert_eq!(r.get(), Value::Int(10));
    assert!(r.set(20));
    assert_eq!(r.get(), Value::Int(20));
}

#[test]
fn ref_set_notifies() {
    let mut cr = CallRecorder::new();
    let r = RefBox::new(10);
    let r0 = r.clone();
    let _e = effect(move || {
        call!("{:?}", r0.get());
    });
    cr.verify("10");

    r.set(20);
    cr.verify("20");

    r.set(20);
    cr.verify(());
}

#[test]
fn readonly_ref_rejects_set() {
    let mut cr = CallRecorder::new();
    let r = RefBox::new_readonly(10);
    let r0 = r.clone();
    let _e = effect(move || {
        call!("{:?}", r0.get());
    });
    cr.verify("10");

    assert!(!r.set(20));
    assert_eq!(r.peek(), Value::Int(10));
    cr.verify(());
}

#[test]
fn deep_ref_wraps_container_on_read() {
    let m: RawMap = [("a", 1)].into_iter().collect();
    let r = RefBox::new(m.clone());
    assert!(matches!(r.get(), Value::View(_)));
    assert!(matches!(r.peek(), Value::Map(_)));

    let shallow = RefBox::new_shallow(m);
    assert!(matches!(shallow.get(), Value::Map(_)));
}

#[test]
fn deep_ref_unwraps_assigned_view() {
    let m: RawMap = [("a", 1)].into_iter().collect();
    let r = RefBox::new(Value::Null);
    r.set(reactive(m.clone()));
    assert!(matches!(r.peek(), Value::Map(_)));
    assert!(r.peek().is_same(&Value::Map(m)));
}

#[test]
fn serialize_values() {
    let m: RawMap = [("a", Value::Int(1)), ("b", Value::str("x"))]
        .into_iter()
        .collect();
    assert_eq!(
        serde_json::to_string(&Value::Map(m)).unwrap(),
        r#"{"a":1,"b":"x"}"#
    );

    let l: RawList = [Value::Int(1), Value::Null, Value::Bool(true)]
        .into_iter()
        .collect();
    assert_eq!(
        serde_json::to_string(&Value::List(l)).unwrap(),
        "[1,null,true]"
    );
}

#[test]
fn serialize_ref_and_view_transparently() {
    let r = RefBox::new(10);
    assert_eq!(serde_json::to_string(&Value::Ref(r)).unwrap(), "10");

    let m: RawMap = [("a", 1)].into_iter().collect();
    let v = reactive(m);
    assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"a":1}"#);
}

#[test]
fn deserialize_values() {
    let v: Value = serde_json::from_str(r#"{"a":[1,2.5,"x"],"b":null}"#).unwrap();
    let Value::Map(m) = v else { panic!("expected map") };
    let Some(Value::List(l)) = m.get("a") else {
        panic!("expected list")
    };
    assert_eq!(l.get(0), Some(Value::Int(1)));
    assert_eq!(l.get(1), Some(Value::Float(2.5)));
    assert_eq!(l.get(2), Some(Value::str("x")));
    assert_eq!(m.get("b"), Some(Value::Null));
}

#[test]
fn debug_formats() {
    let m: RawMap = [("a", 1)].into_iter().collect();
    assert_eq!(format!("{:?}", Value::Map(m)), r#"{"a": 1}"#);
    let l: RawList = [1, 2].into_iter().collect();
    assert_eq!(format!("{:?}", Value::List(l)), "[1, 2]");
    assert_eq!(format!("{:?}", Value::str("x")), r#""x""#);
}
