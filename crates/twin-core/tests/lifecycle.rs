//! ---
//! twin_section: "02-lifecycle"
//! twin_subsection: "tests"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Lifecycle ordering, stepping, failure and release against the in-process slave."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use tempfile::{tempdir, TempDir};
use twin_common::{ConfigError, ConfigValue, InputAssignment, RunConfig, VariableSelector};
use twin_core::{LifecycleController, LifecycleError, LifecycleState, StepOutcome};
use twin_fmi::{Status, Value};
use twin_testharness::{
    ExchangeProbe, FakeSlave, ScriptedConnector, SlaveProbe, StubLoader, REJECTED,
};

struct Fixture {
    controller: LifecycleController,
    slave: SlaveProbe,
    sink: ExchangeProbe,
    _dir: TempDir,
}

fn config(dir: &Path, end_time: f64, step_size: f64) -> RunConfig {
    let mut config = RunConfig::for_package(dir.join("linear.fmu"));
    config.model.end_time = end_time;
    config.model.step_size = step_size;
    config.run.counter_file = dir.join("guid.txt");
    config.inputs = vec![InputAssignment::new(
        VariableSelector::Reference(0),
        ConfigValue::Real(2.0),
    )];
    config.outputs = vec![VariableSelector::Reference(1).into()];
    config
}

fn fixture_with(slave: FakeSlave, edit: impl FnOnce(&mut RunConfig)) -> Fixture {
    let dir = tempdir().unwrap();
    let mut config = config(dir.path(), 1.0, 0.5);
    edit(&mut config);
    let loader = StubLoader::new(slave, twin_testharness::linear_model_description());
    let connector = ScriptedConnector::new();
    let (slave, sink) = (loader.probe(), connector.probe());
    let controller =
        LifecycleController::new(config, Box::new(loader), Box::new(connector)).unwrap();
    Fixture {
        controller,
        slave,
        sink,
        _dir: dir,
    }
}

fn fixture(end_time: f64, step_size: f64) -> Fixture {
    fixture_with(FakeSlave::linear(), |config| {
        config.model.end_time = end_time;
        config.model.step_size = step_size;
    })
}

fn start(controller: &mut LifecycleController) {
    controller.open().unwrap();
    controller.instantiate().unwrap();
    controller.initialize().unwrap();
    controller.apply_inputs().unwrap();
}

#[test]
fn scenario_half_second_steps_emit_initial_and_two_batches() {
    let mut fx = fixture(1.0, 0.5);
    start(&mut fx.controller);
    let summary = fx.controller.run().unwrap();
    assert_eq!(summary.steps, 2);
    assert_eq!(summary.run_id, Some(1));
    assert_eq!(summary.end_time, 1.0);
    fx.controller.close().unwrap();

    assert_eq!(
        fx.sink.bodies(),
        vec![
            "linear.fmu,global_id=1 timestamp=0,u=2,y=0\n".to_owned(),
            "linear.fmu,global_id=1 timestamp=0.5,u=2,y=1\n".to_owned(),
            "linear.fmu,global_id=1 timestamp=1,u=2,y=2\n".to_owned(),
        ]
    );
    let header = &fx.sink.headers()[0];
    assert!(header.starts_with("POST /write?db=twin&u=&p= HTTP/1.1\r\n"));
    assert!(header.contains("Content-Length: 43\r\n"));
    assert_eq!(fx.slave.steps(), vec![(0.0, 0.5), (0.5, 0.5)]);
}

#[test]
fn scenario_uneven_grid_clamps_last_step_onto_end_time() {
    let mut fx = fixture(1.0, 0.3);
    start(&mut fx.controller);
    fx.controller.run().unwrap();
    assert_eq!(fx.controller.current_time(), 1.0);
    fx.controller.close().unwrap();

    let steps = fx.slave.steps();
    assert_eq!(steps.len(), 4);
    for (index, expected) in [0.3, 0.3, 0.3, 0.1].iter().enumerate() {
        assert!((steps[index].1 - expected).abs() < 1e-12, "{steps:?}");
    }
    assert_eq!(fx.sink.batches(), 5);
}

#[test]
fn step_count_matches_ceiling_of_span_over_step() {
    for (end_time, step_size) in [(1.0, 0.1), (2.0, 0.3), (0.25, 0.25), (3.0, 0.7)] {
        let mut fx = fixture(end_time, step_size);
        start(&mut fx.controller);
        let summary = fx.controller.run().unwrap();
        let expected = (end_time / step_size - 1e-9).ceil() as u64;
        assert_eq!(summary.steps, expected, "{end_time}/{step_size}");
        assert!((summary.end_time - end_time).abs() < 1e-12);
        fx.controller.close().unwrap();
    }
}

#[test]
fn step_outcomes_report_time_and_finish() {
    let mut fx = fixture(1.0, 0.5);
    start(&mut fx.controller);
    assert_eq!(
        fx.controller.step().unwrap(),
        StepOutcome::Advanced {
            time: 0.5,
            step: 0.5
        }
    );
    assert_eq!(fx.controller.state(), LifecycleState::Stepping);
    assert_eq!(
        fx.controller.step().unwrap(),
        StepOutcome::Advanced {
            time: 1.0,
            step: 0.5
        }
    );
    assert_eq!(
        fx.controller.step().unwrap(),
        StepOutcome::Finished { time: 1.0 }
    );
    assert_eq!(fx.sink.batches(), 3);
}

#[test]
fn calls_out_of_order_are_rejected_without_touching_the_model() {
    let mut fx = fixture(1.0, 0.5);
    let err = fx.controller.step().unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InvalidState {
            operation: "step",
            state: LifecycleState::Unbound
        }
    ));
    assert!(matches!(
        fx.controller.instantiate(),
        Err(LifecycleError::InvalidState { .. })
    ));
    fx.controller.open().unwrap();
    assert!(matches!(
        fx.controller.initialize(),
        Err(LifecycleError::InvalidState {
            operation: "initialize",
            state: LifecycleState::Bound
        })
    ));
    assert!(matches!(
        fx.controller.apply_inputs(),
        Err(LifecycleError::InvalidState { .. })
    ));
    assert!(fx.slave.calls().is_empty());
    assert_eq!(fx.controller.state(), LifecycleState::Bound);
}

#[test]
fn no_model_calls_after_terminate() {
    let mut fx = fixture(1.0, 0.5);
    start(&mut fx.controller);
    fx.controller.step().unwrap();
    fx.controller.terminate().unwrap();
    let calls = fx.slave.calls().len();
    assert!(matches!(
        fx.controller.step(),
        Err(LifecycleError::InvalidState {
            state: LifecycleState::Terminated,
            ..
        })
    ));
    assert!(fx
        .controller
        .read_variable(&VariableSelector::Reference(1))
        .is_err());
    assert_eq!(fx.slave.calls().len(), calls);
    fx.controller.close().unwrap();
    assert_eq!(fx.slave.count("terminate"), 1);
    assert_eq!(fx.slave.count("free"), 1);
}

#[test]
fn failing_step_reports_time_and_stops_telemetry() {
    let mut fx = fixture_with(FakeSlave::linear().fail_step(2, Status::Error), |config| {
        config.model.step_size = 0.2;
    });
    start(&mut fx.controller);
    let err = fx.controller.run().unwrap_err();
    match err {
        LifecycleError::StepFailed {
            time,
            status,
            last_successful_time,
        } => {
            assert!((time - 0.2).abs() < 1e-12);
            assert_eq!(status, Status::Error);
            assert_eq!(last_successful_time, None);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(fx.controller.state(), LifecycleState::Closed);
    assert_eq!(fx.sink.batches(), 2);
    assert_eq!(fx.slave.live_instances(), 0);
    assert_eq!(fx.slave.unbind_calls(), 1);
    assert_eq!(fx.sink.closes(), 1);
    assert_eq!(fx.controller.metrics().steps(), 1);
}

#[test]
fn discarded_step_carries_last_successful_time() {
    let mut fx = fixture_with(FakeSlave::linear().fail_step(2, Status::Discard), |config| {
        config.model.step_size = 0.25;
    });
    start(&mut fx.controller);
    match fx.controller.run().unwrap_err() {
        LifecycleError::StepFailed {
            status,
            last_successful_time,
            ..
        } => {
            assert_eq!(status, Status::Discard);
            assert_eq!(last_successful_time, Some(0.25));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn pending_step_is_cancelled() {
    let mut fx = fixture_with(FakeSlave::linear().fail_step(1, Status::Pending), |_| {});
    start(&mut fx.controller);
    assert!(fx.controller.step().is_err());
    assert_eq!(fx.slave.count("cancel_step"), 1);
}

#[test]
fn warning_from_step_fails_the_run() {
    let mut fx = fixture_with(FakeSlave::linear().fail_step(2, Status::Warning), |config| {
        config.model.step_size = 0.2;
    });
    start(&mut fx.controller);
    match fx.controller.run().unwrap_err() {
        LifecycleError::StepFailed { time, status, .. } => {
            assert!((time - 0.2).abs() < 1e-12);
            assert_eq!(status, Status::Warning);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(fx.sink.batches(), 2);
    assert_eq!(fx.controller.state(), LifecycleState::Closed);
    assert_eq!(fx.slave.live_instances(), 0);
}

#[test]
fn rejected_batch_fails_the_run() {
    let mut fx = fixture(1.0, 0.5);
    fx.sink.push_response(REJECTED);
    start(&mut fx.controller);
    let err = fx.controller.step().unwrap_err();
    assert!(matches!(err, LifecycleError::TelemetryRejected { ref status } if status == "400"));
    assert_eq!(fx.controller.state(), LifecycleState::Closed);
    assert_eq!(fx.slave.live_instances(), 0);
}

#[test]
fn unknown_output_is_a_config_error_and_releases_the_model() {
    let mut fx = fixture_with(FakeSlave::linear(), |config| {
        config.outputs = vec![VariableSelector::Name("nope".into()).into()];
    });
    let err = fx.controller.open().unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Config(ConfigError::UnknownVariable(ref name)) if name == "nope"
    ));
    assert_eq!(fx.sink.connects(), 0);
    assert_eq!(fx.slave.unbind_calls(), 1);
    assert_eq!(fx.controller.state(), LifecycleState::Closed);
}

#[test]
fn incompatible_input_value_is_rejected_at_open() {
    let mut fx = fixture_with(FakeSlave::linear(), |config| {
        config.inputs = vec![InputAssignment::new(
            VariableSelector::Name("enabled".into()),
            ConfigValue::Real(0.5),
        )];
    });
    assert!(matches!(
        fx.controller.open(),
        Err(LifecycleError::Config(ConfigError::IncompatibleValue { .. }))
    ));
}

#[test]
fn refused_sink_fails_open() {
    let dir = tempdir().unwrap();
    let loader = StubLoader::linear();
    let slave = loader.probe();
    let mut controller = LifecycleController::new(
        config(dir.path(), 1.0, 0.5),
        Box::new(loader),
        Box::new(ScriptedConnector::refusing()),
    )
    .unwrap();
    assert!(matches!(
        controller.open(),
        Err(LifecycleError::Transport(_))
    ));
    assert_eq!(slave.unbind_calls(), 1);
}

#[test]
fn instantiate_request_and_run_id() {
    let mut fx = fixture(1.0, 0.5);
    fx.controller.open().unwrap();
    assert_eq!(fx.controller.run_id(), None);
    fx.controller.instantiate().unwrap();
    assert_eq!(fx.controller.run_id(), Some(1));
    let request = fx.slave.last_request().unwrap();
    assert_eq!(request.instance_name, "linear");
    assert_eq!(request.guid, "{5f0e3d52-9a53-4d7c-b2a4-6a1c1c1f7e01}");
    assert!(request.location.starts_with("file://"));
    assert_eq!(request.mime_type, "application/x-fmu-sharedlibrary");
    assert_eq!(request.timeout_ms, 1000.0);
    assert!(!request.visible && !request.interactive && !request.logging_on);
}

#[test]
fn failed_instantiate_does_not_advance_the_counter() {
    let mut fx = fixture_with(FakeSlave::linear().fail_instantiate(), |_| {});
    fx.controller.open().unwrap();
    assert!(matches!(
        fx.controller.instantiate(),
        Err(LifecycleError::InstantiationFailed(_))
    ));
    assert_eq!(fx.slave.unbind_calls(), 1);
    assert!(!fx._dir.path().join("guid.txt").exists());
}

#[test]
fn failed_initialize_frees_the_instance() {
    let mut fx = fixture_with(FakeSlave::linear().initialize_status(Status::Error), |_| {});
    fx.controller.open().unwrap();
    fx.controller.instantiate().unwrap();
    assert!(matches!(
        fx.controller.initialize(),
        Err(LifecycleError::InitializationFailed {
            status: Status::Error
        })
    ));
    assert_eq!(fx.slave.count("free"), 1);
    assert_eq!(fx.slave.live_instances(), 0);
}

#[test]
fn reset_then_reinitialize_replays_the_run() {
    let mut fx = fixture(1.0, 0.5);
    start(&mut fx.controller);
    fx.controller.run().unwrap();
    fx.controller.reset().unwrap();
    assert_eq!(fx.controller.state(), LifecycleState::Instantiated);
    assert_eq!(fx.controller.current_time(), 0.0);

    fx.controller
        .update_input(VariableSelector::Reference(0), Value::Real(4.0))
        .unwrap();
    fx.controller.initialize().unwrap();
    fx.controller.apply_inputs().unwrap();
    fx.controller.run().unwrap();
    fx.controller.close().unwrap();

    let bodies = fx.sink.bodies();
    assert_eq!(bodies.len(), 6);
    assert_eq!(bodies[3], "linear.fmu,global_id=1 timestamp=0,u=4,y=0\n");
    assert_eq!(bodies[5], "linear.fmu,global_id=1 timestamp=1,u=4,y=4\n");
    assert_eq!(fx.slave.count("instantiate"), 1);
}

#[test]
fn failed_reset_keeps_the_run_alive() {
    let mut fx = fixture_with(FakeSlave::linear().reset_status(Status::Error), |_| {});
    start(&mut fx.controller);
    fx.controller.step().unwrap();
    assert!(matches!(
        fx.controller.reset(),
        Err(LifecycleError::ResetFailed {
            status: Status::Error
        })
    ));
    assert_eq!(fx.controller.state(), LifecycleState::Stepping);
    fx.controller.step().unwrap();
    fx.controller.close().unwrap();
}

#[test]
fn inputs_can_change_between_steps() {
    let mut fx = fixture(1.0, 0.5);
    start(&mut fx.controller);
    fx.controller.step().unwrap();
    fx.controller
        .update_input(VariableSelector::Name("u".into()), Value::Integer(-2))
        .unwrap();
    fx.controller.apply_inputs().unwrap();
    fx.controller.step().unwrap();
    assert_eq!(
        fx.controller
            .read_variable(&VariableSelector::Reference(1))
            .unwrap(),
        Value::Real(0.0)
    );
    assert!(fx
        .controller
        .update_input(VariableSelector::Name("missing".into()), Value::Real(1.0))
        .is_err());
}

#[test]
fn batches_report_inputs_as_the_model_holds_them() {
    let mut fx = fixture(1.0, 0.5);
    start(&mut fx.controller);
    fx.controller.step().unwrap();
    fx.controller
        .update_input(VariableSelector::Reference(0), Value::Real(7.0))
        .unwrap();
    fx.controller.step().unwrap();
    assert_eq!(
        fx.sink.bodies()[2],
        "linear.fmu,global_id=1 timestamp=1,u=2,y=2\n"
    );
    assert_eq!(fx.slave.real(0), Some(2.0));
}

#[test]
fn close_is_idempotent_and_releases_everything() {
    let mut fx = fixture(1.0, 0.5);
    start(&mut fx.controller);
    fx.controller.run().unwrap();
    fx.controller.close().unwrap();
    fx.controller.close().unwrap();
    assert_eq!(fx.slave.count("terminate"), 1);
    assert_eq!(fx.slave.count("free"), 1);
    assert_eq!(fx.slave.unbind_calls(), 1);
    assert_eq!(fx.sink.closes(), 1);
    assert_eq!(fx.controller.state(), LifecycleState::Closed);
}

#[test]
fn dropping_an_open_controller_releases_the_instance() {
    let fx = {
        let mut fx = fixture(1.0, 0.5);
        start(&mut fx.controller);
        fx.controller.step().unwrap();
        (fx.slave, fx.sink)
    };
    let (slave, sink) = fx;
    assert_eq!(slave.count("terminate"), 1);
    assert_eq!(slave.live_instances(), 0);
    assert_eq!(slave.unbind_calls(), 1);
    assert_eq!(sink.closes(), 1);
}

#[test]
fn result_file_gets_one_row_per_instant() {
    let dir = tempdir().unwrap();
    let results = dir.path().join("result.csv");
    let path = results.clone();
    let mut fx = fixture_with(FakeSlave::linear(), move |config| {
        config.run.result_file = Some(path);
        config.run.separator = ';';
        config.outputs.push(VariableSelector::Name("steps".into()).into());
    });
    start(&mut fx.controller);
    fx.controller.run().unwrap();
    fx.controller.close().unwrap();
    assert_eq!(
        fs::read_to_string(&results).unwrap(),
        "time;y;steps\n0;0;0\n0.5;1;1\n1;2;2\n"
    );
}

#[test]
fn describe_variable_reports_catalog_metadata() {
    let mut fx = fixture(1.0, 0.5);
    assert!(fx
        .controller
        .describe_variable(&VariableSelector::Index(0))
        .is_err());
    fx.controller.open().unwrap();
    let info = fx
        .controller
        .describe_variable(&VariableSelector::Name("mode".into()))
        .unwrap();
    assert_eq!(info.index, 6);
    assert_eq!(info.causality, "input");
    assert_eq!(info.reference, 1);
    assert_eq!(info.type_code, 3);
    assert_eq!(info.start, Some(Value::Integer(1)));
}

#[test]
fn debug_logging_is_forwarded() {
    let mut fx = fixture(1.0, 0.5);
    fx.controller.open().unwrap();
    fx.controller.instantiate().unwrap();
    fx.controller.set_debug_logging(true).unwrap();
    assert_eq!(fx.slave.debug_logging(), Some(true));
}
