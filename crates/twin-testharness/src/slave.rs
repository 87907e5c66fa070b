//! ---
//! twin_section: "07-testing"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Scriptable in-process co-simulation slave."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use twin_fmi::{
    FmiApi, FmiError, InstantiateRequest, ModelDescription, ModelHandle, Status, StatusKind,
    Value, VariableType,
};

/// Catalog used by most tests: `u` (ref 0) drives `y` (ref 1).
pub const LINEAR_MODEL_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<fmiModelDescription fmiVersion="1.0" modelName="linear" modelIdentifier="linear"
    guid="{5f0e3d52-9a53-4d7c-b2a4-6a1c1c1f7e01}" description="Integrator driven by one input">
  <ModelVariables>
    <ScalarVariable name="u" valueReference="0" causality="input">
      <Real start="0"/>
    </ScalarVariable>
    <ScalarVariable name="y" valueReference="1" causality="output">
      <Real start="0"/>
    </ScalarVariable>
    <ScalarVariable name="elapsed time" valueReference="2" causality="output">
      <Real start="0"/>
    </ScalarVariable>
    <ScalarVariable name="steps" valueReference="0" causality="output">
      <Integer start="0"/>
    </ScalarVariable>
    <ScalarVariable name="enabled" valueReference="0" causality="input">
      <Boolean start="true"/>
    </ScalarVariable>
    <ScalarVariable name="label" valueReference="0" variability="parameter" causality="input">
      <String start="plant"/>
    </ScalarVariable>
    <ScalarVariable name="mode" valueReference="1" causality="input">
      <Enumeration start="1"/>
    </ScalarVariable>
  </ModelVariables>
</fmiModelDescription>"#;

pub fn linear_model_description() -> ModelDescription {
    LINEAR_MODEL_XML
        .parse()
        .expect("bundled model description is valid")
}

/// Observable side of a [`FakeSlave`], kept after the slave is boxed.
#[derive(Debug, Default)]
pub struct SlaveLog {
    pub calls: Vec<String>,
    pub live_instances: i32,
    pub unbind_calls: u32,
    pub steps: Vec<(f64, f64)>,
    pub reals: BTreeMap<u32, f64>,
    pub integers: BTreeMap<u32, i32>,
    pub booleans: BTreeMap<u32, bool>,
    pub strings: BTreeMap<u32, String>,
    pub last_request: Option<InstantiateRequest>,
    pub debug_logging: Option<bool>,
}

/// Cloneable handle onto the fake's call log and variable store.
#[derive(Debug, Clone, Default)]
pub struct SlaveProbe(Arc<Mutex<SlaveLog>>);

impl SlaveProbe {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0
            .lock()
            .calls
            .iter()
            .filter(|entry| entry.as_str() == call)
            .count()
    }

    pub fn live_instances(&self) -> i32 {
        self.0.lock().live_instances
    }

    pub fn unbind_calls(&self) -> u32 {
        self.0.lock().unbind_calls
    }

    /// `(communication point, step size)` of every accepted step.
    pub fn steps(&self) -> Vec<(f64, f64)> {
        self.0.lock().steps.clone()
    }

    pub fn real(&self, reference: u32) -> Option<f64> {
        self.0.lock().reals.get(&reference).copied()
    }

    pub fn string(&self, reference: u32) -> Option<String> {
        self.0.lock().strings.get(&reference).cloned()
    }

    pub fn last_request(&self) -> Option<InstantiateRequest> {
        self.0.lock().last_request.clone()
    }

    pub fn debug_logging(&self) -> Option<bool> {
        self.0.lock().debug_logging
    }
}

#[derive(Debug, Clone, Copy)]
struct Integrator {
    input: u32,
    output: u32,
    gain: f64,
}

/// [`FmiApi`] double with deterministic dynamics and failure injection.
///
/// Each step adds `gain * input * h` to every integrator output, stores the
/// new time in the optional clock output and counts steps in the optional
/// integer counter.
pub struct FakeSlave {
    model_identifier: String,
    probe: SlaveProbe,
    bound: bool,
    initial: SlaveLog,
    integrators: Vec<Integrator>,
    clock_output: Option<u32>,
    step_counter: Option<u32>,
    instance: Box<u8>,
    fail_instantiate: bool,
    initialize_status: Status,
    reset_status: Status,
    step_failures: HashMap<usize, Status>,
    step_calls: usize,
    failing_sets: Vec<u32>,
    last_successful_time: f64,
}

impl FakeSlave {
    /// Variables start at their declared start values.
    pub fn new(description: &ModelDescription) -> Self {
        let mut initial = SlaveLog::default();
        for variable in description.variables() {
            match (&variable.start, variable.variable_type) {
                (Some(Value::Real(value)), _) => {
                    initial.reals.insert(variable.reference, *value);
                }
                (Some(Value::Integer(value)), _) => {
                    initial
                        .integers
                        .insert(variable.reference, *value as i32);
                }
                (Some(Value::Boolean(value)), _) => {
                    initial.booleans.insert(variable.reference, *value);
                }
                (Some(Value::String(value)), _) => {
                    initial.strings.insert(variable.reference, value.clone());
                }
                (None, VariableType::Real) => {
                    initial.reals.insert(variable.reference, 0.0);
                }
                (None, _) => {}
            }
        }
        let probe = SlaveProbe::default();
        {
            let mut log = probe.0.lock();
            log.reals = initial.reals.clone();
            log.integers = initial.integers.clone();
            log.booleans = initial.booleans.clone();
            log.strings = initial.strings.clone();
        }
        Self {
            model_identifier: description.model_identifier.clone(),
            probe,
            bound: true,
            initial,
            integrators: Vec::new(),
            clock_output: None,
            step_counter: None,
            instance: Box::new(0),
            fail_instantiate: false,
            initialize_status: Status::Ok,
            reset_status: Status::Ok,
            step_failures: HashMap::new(),
            step_calls: 0,
            failing_sets: Vec::new(),
            last_successful_time: 0.0,
        }
    }

    /// The bundled linear model: `y' = u`, `elapsed time = t`, `steps` counted.
    pub fn linear() -> Self {
        Self::new(&linear_model_description())
            .with_integrator(0, 1, 1.0)
            .with_clock_output(2)
            .with_step_counter(0)
    }

    pub fn probe(&self) -> SlaveProbe {
        self.probe.clone()
    }

    pub fn with_integrator(mut self, input: u32, output: u32, gain: f64) -> Self {
        self.integrators.push(Integrator {
            input,
            output,
            gain,
        });
        self
    }

    pub fn with_clock_output(mut self, reference: u32) -> Self {
        self.clock_output = Some(reference);
        self
    }

    pub fn with_step_counter(mut self, reference: u32) -> Self {
        self.step_counter = Some(reference);
        self
    }

    /// The `call`-th do_step (1-based) returns `status` without advancing.
    pub fn fail_step(mut self, call: usize, status: Status) -> Self {
        self.step_failures.insert(call, status);
        self
    }

    pub fn fail_instantiate(mut self) -> Self {
        self.fail_instantiate = true;
        self
    }

    pub fn initialize_status(mut self, status: Status) -> Self {
        self.initialize_status = status;
        self
    }

    pub fn reset_status(mut self, status: Status) -> Self {
        self.reset_status = status;
        self
    }

    /// Setting any variable with this reference reports `Error`.
    pub fn fail_set(mut self, reference: u32) -> Self {
        self.failing_sets.push(reference);
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.probe.0.lock().calls.push(call.into());
    }

    fn gate(&self) -> Status {
        if self.bound {
            Status::Ok
        } else {
            Status::Fatal
        }
    }

    fn set_status(&self, refs: &[u32]) -> Status {
        if refs.iter().any(|reference| self.failing_sets.contains(reference)) {
            Status::Error
        } else {
            self.gate()
        }
    }
}

impl FmiApi for FakeSlave {
    fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn types_platform(&self) -> Result<String, FmiError> {
        if self.bound {
            Ok("standard32".to_owned())
        } else {
            Err(FmiError::Unbound)
        }
    }

    fn version(&self) -> Result<String, FmiError> {
        if self.bound {
            Ok("1.0".to_owned())
        } else {
            Err(FmiError::Unbound)
        }
    }

    fn instantiate_slave(&mut self, request: &InstantiateRequest) -> Result<ModelHandle, FmiError> {
        self.record("instantiate");
        if !self.bound {
            return Err(FmiError::Unbound);
        }
        if self.fail_instantiate {
            return Err(FmiError::InstantiationFailed(request.instance_name.clone()));
        }
        let mut log = self.probe.0.lock();
        log.live_instances += 1;
        log.last_request = Some(request.clone());
        drop(log);
        let pointer: *mut c_void = (self.instance.as_mut() as *mut u8).cast();
        ModelHandle::from_raw(pointer)
            .ok_or_else(|| FmiError::InstantiationFailed(request.instance_name.clone()))
    }

    fn set_debug_logging(&mut self, _handle: &ModelHandle, logging_on: bool) -> Status {
        self.record("set_debug_logging");
        self.probe.0.lock().debug_logging = Some(logging_on);
        self.gate()
    }

    fn initialize_slave(
        &mut self,
        _handle: &ModelHandle,
        start_time: f64,
        stop_time_defined: bool,
        stop_time: f64,
    ) -> Status {
        self.record(format!(
            "initialize({start_time},{stop_time_defined},{stop_time})"
        ));
        self.last_successful_time = start_time;
        match self.gate() {
            Status::Ok => self.initialize_status,
            other => other,
        }
    }

    fn terminate_slave(&mut self, _handle: &ModelHandle) -> Status {
        self.record("terminate");
        self.gate()
    }

    fn reset_slave(&mut self, _handle: &ModelHandle) -> Status {
        self.record("reset");
        if self.gate() != Status::Ok || !self.reset_status.is_acceptable() {
            return match self.gate() {
                Status::Ok => self.reset_status,
                other => other,
            };
        }
        let mut log = self.probe.0.lock();
        log.reals = self.initial.reals.clone();
        log.integers = self.initial.integers.clone();
        log.booleans = self.initial.booleans.clone();
        log.strings = self.initial.strings.clone();
        drop(log);
        self.step_calls = 0;
        self.reset_status
    }

    fn free_slave_instance(&mut self, _handle: ModelHandle) {
        self.record("free");
        self.probe.0.lock().live_instances -= 1;
    }

    fn set_real(&mut self, _handle: &ModelHandle, refs: &[u32], values: &[f64]) -> Status {
        self.record("set_real");
        let status = self.set_status(refs);
        if status == Status::Ok {
            let mut log = self.probe.0.lock();
            for (reference, value) in refs.iter().zip(values) {
                log.reals.insert(*reference, *value);
            }
        }
        status
    }

    fn set_integer(&mut self, _handle: &ModelHandle, refs: &[u32], values: &[i32]) -> Status {
        self.record("set_integer");
        let status = self.set_status(refs);
        if status == Status::Ok {
            let mut log = self.probe.0.lock();
            for (reference, value) in refs.iter().zip(values) {
                log.integers.insert(*reference, *value);
            }
        }
        status
    }

    fn set_boolean(&mut self, _handle: &ModelHandle, refs: &[u32], values: &[bool]) -> Status {
        self.record("set_boolean");
        let status = self.set_status(refs);
        if status == Status::Ok {
            let mut log = self.probe.0.lock();
            for (reference, value) in refs.iter().zip(values) {
                log.booleans.insert(*reference, *value);
            }
        }
        status
    }

    fn set_string(&mut self, _handle: &ModelHandle, refs: &[u32], values: &[&str]) -> Status {
        self.record("set_string");
        let status = self.set_status(refs);
        if status == Status::Ok {
            let mut log = self.probe.0.lock();
            for (reference, value) in refs.iter().zip(values) {
                log.strings.insert(*reference, (*value).to_owned());
            }
        }
        status
    }

    fn get_real(&mut self, _handle: &ModelHandle, refs: &[u32], values: &mut [f64]) -> Status {
        let log = self.probe.0.lock();
        for (reference, slot) in refs.iter().zip(values.iter_mut()) {
            match log.reals.get(reference) {
                Some(value) => *slot = *value,
                None => return Status::Error,
            }
        }
        self.gate()
    }

    fn get_integer(&mut self, _handle: &ModelHandle, refs: &[u32], values: &mut [i32]) -> Status {
        let log = self.probe.0.lock();
        for (reference, slot) in refs.iter().zip(values.iter_mut()) {
            match log.integers.get(reference) {
                Some(value) => *slot = *value,
                None => return Status::Error,
            }
        }
        self.gate()
    }

    fn get_boolean(&mut self, _handle: &ModelHandle, refs: &[u32], values: &mut [bool]) -> Status {
        let log = self.probe.0.lock();
        for (reference, slot) in refs.iter().zip(values.iter_mut()) {
            match log.booleans.get(reference) {
                Some(value) => *slot = *value,
                None => return Status::Error,
            }
        }
        self.gate()
    }

    fn get_string(
        &mut self,
        _handle: &ModelHandle,
        refs: &[u32],
        values: &mut [String],
    ) -> Status {
        let log = self.probe.0.lock();
        for (reference, slot) in refs.iter().zip(values.iter_mut()) {
            match log.strings.get(reference) {
                Some(value) => slot.clone_from(value),
                None => return Status::Error,
            }
        }
        self.gate()
    }

    fn set_real_input_derivatives(
        &mut self,
        _handle: &ModelHandle,
        _refs: &[u32],
        _orders: &[i32],
        _values: &[f64],
    ) -> Status {
        self.record("set_real_input_derivatives");
        self.gate()
    }

    fn get_real_output_derivatives(
        &mut self,
        _handle: &ModelHandle,
        _refs: &[u32],
        _orders: &[i32],
        values: &mut [f64],
    ) -> Status {
        values.iter_mut().for_each(|value| *value = 0.0);
        self.gate()
    }

    fn do_step(
        &mut self,
        _handle: &ModelHandle,
        current_time: f64,
        step_size: f64,
        _new_step: bool,
    ) -> Status {
        self.step_calls += 1;
        self.record("do_step");
        if self.gate() != Status::Ok {
            return Status::Fatal;
        }
        if let Some(status) = self.step_failures.get(&self.step_calls) {
            debug!(call = self.step_calls, %status, "injected step failure");
            return *status;
        }
        let now = current_time + step_size;
        let mut log = self.probe.0.lock();
        for integrator in &self.integrators {
            let input = log.reals.get(&integrator.input).copied().unwrap_or(0.0);
            *log.reals.entry(integrator.output).or_insert(0.0) +=
                integrator.gain * input * step_size;
        }
        if let Some(reference) = self.clock_output {
            log.reals.insert(reference, now);
        }
        if let Some(reference) = self.step_counter {
            *log.integers.entry(reference).or_insert(0) += 1;
        }
        log.steps.push((current_time, step_size));
        drop(log);
        self.last_successful_time = now;
        Status::Ok
    }

    fn cancel_step(&mut self, _handle: &ModelHandle) -> Status {
        self.record("cancel_step");
        self.gate()
    }

    fn get_status(&mut self, _handle: &ModelHandle, _kind: StatusKind) -> (Status, Status) {
        (self.gate(), Status::Ok)
    }

    fn get_real_status(&mut self, _handle: &ModelHandle, kind: StatusKind) -> (Status, f64) {
        match kind {
            StatusKind::LastSuccessfulTime => (self.gate(), self.last_successful_time),
            _ => (Status::Discard, 0.0),
        }
    }

    fn get_integer_status(&mut self, _handle: &ModelHandle, _kind: StatusKind) -> (Status, i32) {
        (Status::Discard, 0)
    }

    fn get_boolean_status(&mut self, _handle: &ModelHandle, _kind: StatusKind) -> (Status, bool) {
        (Status::Discard, false)
    }

    fn get_string_status(&mut self, _handle: &ModelHandle, _kind: StatusKind) -> (Status, String) {
        (Status::Discard, String::new())
    }

    fn unbind(&mut self) {
        if self.bound {
            self.record("unbind");
            self.probe.0.lock().unbind_calls += 1;
        }
        self.bound = false;
    }
}
