//! ---
//! twin_section: "02-lifecycle"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Fixed-step loop with output extraction and telemetry per step."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::time::Instant;

use tracing::{debug, error};
use twin_fmi::{FmiApi, ModelDescription, ModelHandle, Status, StatusKind, Value, VariableAccessor};
use twin_metrics::RunMetrics;
use twin_persistence::ResultWriter;
use twin_telemetry::{FieldValue, TelemetryBatch, TelemetryError, TelemetrySink};

use crate::context::{RunContext, SimulationClock};
use crate::error::{LifecycleError, Result};

/// Everything one step touches, borrowed from the controller.
pub struct StepEnv<'a> {
    pub api: &'a mut dyn FmiApi,
    pub handle: &'a ModelHandle,
    pub description: &'a ModelDescription,
    pub context: &'a mut RunContext,
    pub sink: &'a mut dyn TelemetrySink,
    pub results: Option<&'a mut ResultWriter>,
    pub metrics: &'a RunMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// One step completed and was emitted.
    Advanced { time: f64, step: f64 },
    /// The clock already reached the end time; nothing was stepped.
    Finished { time: f64 },
}

/// Drives the clock and records every instant once.
#[derive(Debug, Clone)]
pub struct StepScheduler {
    clock: SimulationClock,
    initial_emitted: bool,
}

impl StepScheduler {
    pub fn new(clock: SimulationClock) -> Self {
        Self {
            clock,
            initial_emitted: false,
        }
    }

    /// Back to time 0; the next call emits the initial instant again.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.initial_emitted = false;
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn completed_steps(&self) -> u64 {
        self.clock.completed_steps()
    }

    pub fn is_finished(&self) -> bool {
        self.initial_emitted && self.clock.is_finished()
    }

    /// Emit the initial instant on first use, then advance one step.
    pub fn step(&mut self, env: &mut StepEnv<'_>) -> Result<StepOutcome> {
        if !self.initial_emitted {
            self.record_instant(env)?;
            self.initial_emitted = true;
        }
        let Some(step) = self.clock.next_step() else {
            return Ok(StepOutcome::Finished {
                time: self.clock.current_time(),
            });
        };
        let time = self.clock.current_time();
        let started = Instant::now();
        let status = env.api.do_step(env.handle, time, step, true);
        if status != Status::Ok {
            return Err(self.step_failure(env, time, step, status));
        }
        let now = self.clock.advance();
        env.metrics.record_step(now, started.elapsed());
        self.record_instant(env)?;
        Ok(StepOutcome::Advanced { time: now, step })
    }

    fn step_failure(
        &self,
        env: &mut StepEnv<'_>,
        time: f64,
        step: f64,
        status: Status,
    ) -> LifecycleError {
        if status == Status::Pending {
            let cancelled = env.api.cancel_step(env.handle);
            debug!(time, %cancelled, "cancelled pending step");
        }
        let last_successful_time = match status {
            Status::Discard => {
                let (query, value) = env
                    .api
                    .get_real_status(env.handle, StatusKind::LastSuccessfulTime);
                query.is_acceptable().then_some(value)
            }
            _ => None,
        };
        env.metrics.record_step_failure();
        error!(time, step, %status, ?last_successful_time, "model step failed");
        LifecycleError::StepFailed {
            time,
            status,
            last_successful_time,
        }
    }

    /// Read inputs and outputs back from the model, emit the batch and append
    /// a result row for the current time.
    fn record_instant(&mut self, env: &mut StepEnv<'_>) -> Result<()> {
        let time = self.clock.current_time();
        let mut batch = TelemetryBatch::new(env.context.run_id.unwrap_or_default(), time);
        let mut accessor = VariableAccessor::new(&mut *env.api, env.handle);
        for (descriptor, _) in env.context.input_descriptors(env.description) {
            let value = accessor
                .get_value(descriptor)
                .map_err(LifecycleError::ModelCallFailed)?;
            batch.push(descriptor.name.clone(), field_value(&value));
        }

        for slot in 0..env.context.outputs.len() {
            let Some(descriptor) = env.context.outputs[slot]
                .catalog_index
                .and_then(|index| env.description.variable(index))
            else {
                continue;
            };
            let value = accessor
                .get_value(descriptor)
                .map_err(LifecycleError::ModelCallFailed)?;
            env.context.output_buffer[slot] = value.as_f64().unwrap_or(f64::NAN);
            batch.push(descriptor.name.clone(), field_value(&value));
        }

        let metrics = env.metrics;
        let ack = env.sink.emit(&batch).map_err(|err| {
            if let TelemetryError::Rejected { status } = &err {
                metrics.record_rejection(status);
            }
            LifecycleError::from(err)
        })?;
        metrics.record_batch(ack.round_trip);

        if let Some(results) = env.results.as_deref_mut() {
            results.write_row(time, &env.context.output_buffer)?;
        }
        debug!(
            run_id = batch.run_id,
            time,
            fields = batch.fields.len(),
            "instant recorded"
        );
        Ok(())
    }
}

fn field_value(value: &Value) -> FieldValue {
    match value {
        Value::Real(value) => FieldValue::Real(*value),
        Value::Integer(value) => FieldValue::Integer(*value),
        Value::Boolean(value) => FieldValue::Boolean(*value),
        Value::String(value) => FieldValue::Text(value.clone()),
    }
}
