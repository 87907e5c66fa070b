//! ---
//! twin_section: "07-testing"
//! twin_subsection: "integration-tests"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Repeated runs, run counter persistence and field name sanitization."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::Result;
use tempfile::tempdir;
use twin_common::{ConfigValue, InputAssignment, RunConfig, VariableSelector};
use twin_core::LifecycleController;
use twin_fmi::ModelDescription;
use twin_testharness::{ExchangeProbe, FakeSlave, ScriptedConnector, StubLoader};

fn run_once(dir: &Path, loader: StubLoader, outputs: &[&str]) -> Result<ExchangeProbe> {
    let mut config = RunConfig::for_package(dir.join("linear.fmu"));
    config.model.end_time = 1.0;
    config.model.step_size = 0.25;
    config.run.counter_file = dir.join("guid.txt");
    config.inputs = vec![InputAssignment::new(
        VariableSelector::Name("u".into()),
        ConfigValue::Real(0.5),
    )];
    config.outputs = outputs
        .iter()
        .map(|name| VariableSelector::Name((*name).to_owned()).into())
        .collect();
    let connector = ScriptedConnector::new();
    let probe = connector.probe();
    let mut controller = LifecycleController::new(config, Box::new(loader), Box::new(connector))?;
    controller.open()?;
    controller.instantiate()?;
    controller.initialize()?;
    controller.apply_inputs()?;
    controller.run()?;
    controller.close()?;
    Ok(probe)
}

#[test]
fn identical_runs_differ_only_in_run_id() -> Result<()> {
    let dir = tempdir()?;
    let outputs = ["y", "elapsed time", "steps"];
    let first = run_once(dir.path(), StubLoader::linear(), &outputs)?.bodies();
    let second = run_once(dir.path(), StubLoader::linear(), &outputs)?.bodies();

    assert_eq!(first.len(), 5);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert!(a.contains(",global_id=1 "), "{a}");
        assert_eq!(a.replace(",global_id=1 ", ",global_id=2 "), *b);
    }
    assert_eq!(
        first[4],
        "linear.fmu,global_id=1 timestamp=1,u=0.5,y=0.5,elapsedtime=1,steps=4\n"
    );
    Ok(())
}

#[test]
fn run_counter_advances_by_one_per_instantiate() -> Result<()> {
    let dir = tempdir()?;
    for expected in 1..=3u64 {
        let bodies = run_once(dir.path(), StubLoader::linear(), &["y"])?.bodies();
        assert!(bodies[0].contains(&format!(",global_id={expected} ")));
        assert_eq!(
            fs::read_to_string(dir.path().join("guid.txt"))?.trim(),
            expected.to_string()
        );
    }
    Ok(())
}

#[test]
fn field_names_are_sanitized_once() -> Result<()> {
    let xml = r#"<fmiModelDescription fmiVersion="1.0" modelName="m" modelIdentifier="m" guid="{g}">
  <ModelVariables>
    <ScalarVariable name="u" valueReference="0" causality="input"><Real start="0"/></ScalarVariable>
    <ScalarVariable name="tank level, north (m)" valueReference="1" causality="output"><Real start="3.5"/></ScalarVariable>
    <ScalarVariable name="state=ok" valueReference="0" causality="output"><String start="a b"/></ScalarVariable>
  </ModelVariables>
</fmiModelDescription>"#;
    let description: ModelDescription = xml.parse()?;
    let loader = StubLoader::new(FakeSlave::new(&description), description);
    let dir = tempdir()?;
    let bodies = run_once(
        dir.path(),
        loader,
        &["tank level, north (m)", "state=ok"],
    )?
    .bodies();
    assert_eq!(
        bodies[0],
        "linear.fmu,global_id=1 timestamp=0,u=0.5,tanklevel.north(m)=3.5,state=ok=\"a b\"\n"
    );
    Ok(())
}
