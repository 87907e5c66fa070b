//! ---
//! twin_section: "02-lifecycle"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Run context and simulation clock."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::path::PathBuf;

use serde::Serialize;
use twin_common::{ConfigError, RunConfig, VariableSelector};
use twin_fmi::{ModelDescription, Value, VariableDescriptor};

/// Relative slack, in units of the nominal step, absorbed at the end of a run.
pub const CLOCK_TOLERANCE: f64 = 1e-9;

/// Fixed-step simulation time.
///
/// Time is derived from the number of completed steps, so it does not drift
/// over long runs. `current_time` never decreases, an applied step never
/// exceeds the time left, and the last step lands exactly on `end_time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationClock {
    completed_steps: u64,
    total_steps: u64,
    end_time: f64,
    nominal_step: f64,
}

impl SimulationClock {
    pub fn new(end_time: f64, nominal_step: f64) -> Self {
        Self {
            completed_steps: 0,
            total_steps: step_count(end_time, nominal_step),
            end_time,
            nominal_step,
        }
    }

    pub fn current_time(&self) -> f64 {
        if self.completed_steps == 0 {
            0.0
        } else if self.is_finished() {
            self.end_time
        } else {
            (self.completed_steps as f64 * self.nominal_step).min(self.end_time)
        }
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn nominal_step(&self) -> f64 {
        self.nominal_step
    }

    pub fn completed_steps(&self) -> u64 {
        self.completed_steps
    }

    pub fn reset(&mut self) {
        self.completed_steps = 0;
    }

    pub fn is_finished(&self) -> bool {
        self.completed_steps >= self.total_steps
    }

    /// Size of the next step, or `None` once the end time is reached.
    pub fn next_step(&self) -> Option<f64> {
        if self.is_finished() {
            return None;
        }
        if self.completed_steps + 1 == self.total_steps {
            Some(self.end_time - self.current_time())
        } else {
            Some(self.nominal_step)
        }
    }

    /// Count one applied step; the last one snaps onto `end_time`.
    pub fn advance(&mut self) -> f64 {
        if !self.is_finished() {
            self.completed_steps += 1;
        }
        self.current_time()
    }

    /// Number of steps a full run takes.
    pub fn expected_steps(&self) -> u64 {
        self.total_steps
    }
}

fn step_count(end_time: f64, nominal_step: f64) -> u64 {
    if end_time <= 0.0 || nominal_step <= 0.0 {
        return 0;
    }
    (end_time / nominal_step - CLOCK_TOLERANCE).ceil().max(0.0) as u64
}

/// A configured input, resolved against the catalog once the model is open.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    pub selector: VariableSelector,
    pub value: Value,
    pub catalog_index: Option<usize>,
}

impl InputBinding {
    /// Resolve the selector and coerce the value to the variable's type.
    pub fn bind(&mut self, description: &ModelDescription) -> Result<(), ConfigError> {
        let descriptor = description
            .resolve(&self.selector)
            .ok_or_else(|| ConfigError::UnknownVariable(self.selector.to_string()))?;
        self.value = self
            .value
            .coerce_to(descriptor.variable_type, &descriptor.name)
            .map_err(|err| ConfigError::IncompatibleValue {
                selector: self.selector.to_string(),
                value: self.value.to_string(),
                reason: err.to_string(),
            })?;
        self.catalog_index = Some(descriptor.index);
        Ok(())
    }
}

/// A requested output, resolved against the catalog once the model is open.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBinding {
    pub selector: VariableSelector,
    pub catalog_index: Option<usize>,
}

/// Per-run state shared by the controller and the scheduler.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub package_path: PathBuf,
    pub end_time: f64,
    pub step_size: f64,
    pub run_id: Option<u64>,
    pub endpoint: String,
    pub inputs: Vec<InputBinding>,
    pub outputs: Vec<OutputBinding>,
    /// Latest output values, parallel to `outputs`.
    pub output_buffer: Vec<f64>,
}

impl RunContext {
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let inputs = config
            .inputs
            .iter()
            .map(|input| {
                Ok(InputBinding {
                    selector: input.variable.selector()?,
                    value: Value::from(&input.value),
                    catalog_index: None,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let outputs = config
            .outputs
            .iter()
            .map(|output| {
                Ok(OutputBinding {
                    selector: output.selector()?,
                    catalog_index: None,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            package_path: config.model.package.clone(),
            end_time: config.model.end_time,
            step_size: config.model.step_size,
            run_id: None,
            endpoint: config.sink.address(),
            output_buffer: vec![0.0; outputs.len()],
            inputs,
            outputs,
        })
    }

    pub fn clock(&self) -> SimulationClock {
        SimulationClock::new(self.end_time, self.step_size)
    }

    /// Bind every selector to a catalog entry and check input values against
    /// the variable types.
    pub fn resolve(&mut self, description: &ModelDescription) -> Result<(), ConfigError> {
        for input in &mut self.inputs {
            input.bind(description)?;
        }
        for output in &mut self.outputs {
            let descriptor = description
                .resolve(&output.selector)
                .ok_or_else(|| ConfigError::UnknownVariable(output.selector.to_string()))?;
            output.catalog_index = Some(descriptor.index);
        }
        self.output_buffer = vec![0.0; self.outputs.len()];
        Ok(())
    }

    /// Catalog entries of the resolved inputs, in configuration order.
    pub fn input_descriptors<'a>(
        &'a self,
        description: &'a ModelDescription,
    ) -> impl Iterator<Item = (&'a VariableDescriptor, &'a Value)> + 'a {
        self.inputs.iter().filter_map(move |input| {
            input
                .catalog_index
                .and_then(|index| description.variable(index))
                .map(|descriptor| (descriptor, &input.value))
        })
    }

    /// Catalog entries of the resolved outputs, in configuration order.
    pub fn output_descriptors<'a>(
        &'a self,
        description: &'a ModelDescription,
    ) -> impl Iterator<Item = &'a VariableDescriptor> + 'a {
        self.outputs.iter().filter_map(move |output| {
            output
                .catalog_index
                .and_then(|index| description.variable(index))
        })
    }
}
