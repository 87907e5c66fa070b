//! ---
//! twin_section: "07-testing"
//! twin_subsection: "integration-tests"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Typed set/get through the variable accessor for every catalog type."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use twin_fmi::{
    FmiApi, FmiError, InstantiateRequest, ModelDescription, ModelHandle, Status, Value,
    VariableAccessor,
};
use twin_testharness::{linear_model_description, FakeSlave};

fn request() -> InstantiateRequest {
    InstantiateRequest {
        instance_name: "linear".into(),
        guid: "{5f0e3d52-9a53-4d7c-b2a4-6a1c1c1f7e01}".into(),
        location: "file:///tmp/".into(),
        mime_type: "application/x-fmu-sharedlibrary".into(),
        timeout_ms: 1000.0,
        visible: false,
        interactive: false,
        logging_on: false,
    }
}

fn instance(slave: &mut FakeSlave) -> ModelHandle {
    let handle = slave.instantiate_slave(&request()).unwrap();
    assert_eq!(slave.initialize_slave(&handle, 0.0, true, 1.0), Status::Ok);
    handle
}

fn round_trip(
    slave: &mut FakeSlave,
    handle: &ModelHandle,
    description: &ModelDescription,
    name: &str,
    value: Value,
) -> Result<Value, FmiError> {
    let descriptor = description.by_name(name).unwrap();
    let mut accessor = VariableAccessor::new(slave, handle);
    accessor.set_value(descriptor, &value)?;
    accessor.get_value(descriptor)
}

#[test]
fn every_type_reads_back_what_was_written() {
    let description = linear_model_description();
    let mut slave = FakeSlave::linear();
    let handle = instance(&mut slave);
    let cases = [
        ("u", Value::Real(-1.25e-3)),
        ("steps", Value::Integer(-7)),
        ("mode", Value::Integer(3)),
        ("enabled", Value::Boolean(false)),
        ("enabled", Value::Boolean(true)),
        ("label", Value::String("pump \"A\" \\ west".into())),
        ("label", Value::String(String::new())),
    ];
    for (name, value) in cases {
        let read = round_trip(&mut slave, &handle, &description, name, value.clone()).unwrap();
        assert_eq!(read, value, "{name}");
    }
    slave.free_slave_instance(handle);
}

#[test]
fn lossless_coercions_are_applied() {
    let description = linear_model_description();
    let mut slave = FakeSlave::linear();
    let handle = instance(&mut slave);
    assert_eq!(
        round_trip(&mut slave, &handle, &description, "u", Value::Integer(5)).unwrap(),
        Value::Real(5.0)
    );
    assert_eq!(
        round_trip(&mut slave, &handle, &description, "steps", Value::Real(12.0)).unwrap(),
        Value::Integer(12)
    );
    assert_eq!(
        round_trip(&mut slave, &handle, &description, "enabled", Value::Integer(0)).unwrap(),
        Value::Boolean(false)
    );
    slave.free_slave_instance(handle);
}

#[test]
fn lossy_values_are_type_mismatches() {
    let description = linear_model_description();
    let mut slave = FakeSlave::linear();
    let handle = instance(&mut slave);
    let calls_before = slave.probe().calls().len();
    for (name, value) in [
        ("u", Value::String("1.0".into())),
        ("steps", Value::Real(0.5)),
        ("steps", Value::Integer(i64::from(i32::MAX) + 1)),
        ("enabled", Value::Integer(2)),
        ("label", Value::Real(1.0)),
    ] {
        let err = round_trip(&mut slave, &handle, &description, name, value).unwrap_err();
        assert!(matches!(err, FmiError::TypeMismatch { .. }), "{name}: {err}");
    }
    assert_eq!(slave.probe().calls().len(), calls_before);
    slave.free_slave_instance(handle);
}

#[test]
fn refused_set_is_a_model_call_failure() {
    let description = linear_model_description();
    let mut slave = FakeSlave::linear().fail_set(0);
    let handle = instance(&mut slave);
    let err = round_trip(&mut slave, &handle, &description, "u", Value::Real(1.0)).unwrap_err();
    match err {
        FmiError::ModelCallFailed {
            variable, status, ..
        } => {
            assert_eq!(variable, "u");
            assert_eq!(status, Status::Error);
        }
        other => panic!("unexpected error {other}"),
    }
    slave.free_slave_instance(handle);
}
