//! ---
//! twin_section: "02-lifecycle"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Model lifecycle state machine and release paths."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! The lifecycle controller owns the model binding, the instance handle and
//! the telemetry connection for one run, and only lets ABI calls through in
//! the states where the co-simulation interface allows them.

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use twin_common::{RunConfig, VariableSelector};
use twin_fmi::{
    InstantiateRequest, LoadedModel, ModelDescription, ModelHandle, ModelLoader, NativeLoader,
    Status, Value, VariableAccessor, VariableDescriptor,
};
use twin_metrics::RunMetrics;
use twin_persistence::{ResultWriter, RunCounter};
use twin_telemetry::{SinkConnector, TcpConnector, TelemetrySink};

use crate::context::{InputBinding, RunContext};
use crate::error::{LifecycleError, Result};
use crate::scheduler::{StepEnv, StepOutcome, StepScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unbound,
    Bound,
    Instantiated,
    Initialized,
    Stepping,
    Terminated,
    Closed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Unbound => "unbound",
            LifecycleState::Bound => "bound",
            LifecycleState::Instantiated => "instantiated",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Stepping => "stepping",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog entry as shown by introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableInfo {
    pub index: usize,
    pub name: String,
    pub causality: String,
    pub reference: u32,
    pub type_code: u8,
    pub start: Option<Value>,
}

impl From<&VariableDescriptor> for VariableInfo {
    fn from(descriptor: &VariableDescriptor) -> Self {
        Self {
            index: descriptor.index,
            name: descriptor.name.clone(),
            causality: descriptor.causality.to_string(),
            reference: descriptor.reference,
            type_code: descriptor.variable_type.type_code(),
            start: descriptor.start.clone(),
        }
    }
}

/// Totals reported when a run closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Option<u64>,
    pub steps: u64,
    pub step_size: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub batches: u64,
}

/// State machine around one model instance and one telemetry connection.
pub struct LifecycleController {
    config: RunConfig,
    context: RunContext,
    loader: Box<dyn ModelLoader>,
    connector: Box<dyn SinkConnector>,
    counter: RunCounter,
    metrics: RunMetrics,
    scheduler: StepScheduler,
    state: LifecycleState,
    model: Option<LoadedModel>,
    handle: Option<ModelHandle>,
    sink: Option<Box<dyn TelemetrySink>>,
    results: Option<ResultWriter>,
}

impl LifecycleController {
    /// Validates the configuration; no model or transport resource is touched.
    pub fn new(
        config: RunConfig,
        loader: Box<dyn ModelLoader>,
        connector: Box<dyn SinkConnector>,
    ) -> Result<Self> {
        let context = RunContext::from_config(&config)?;
        let metrics = RunMetrics::detached().map_err(LifecycleError::Metrics)?;
        Ok(Self {
            counter: RunCounter::new(&config.run.counter_file),
            scheduler: StepScheduler::new(context.clock()),
            context,
            config,
            loader,
            connector,
            metrics,
            state: LifecycleState::Unbound,
            model: None,
            handle: None,
            sink: None,
            results: None,
        })
    }

    /// Controller wired to the shared-library loader and the TCP sink.
    pub fn native(config: RunConfig) -> Result<Self> {
        let connector = TcpConnector::new(&config.sink);
        Self::new(config, Box::new(NativeLoader), Box::new(connector))
    }

    /// Record into `metrics` instead of the private registry.
    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn run_id(&self) -> Option<u64> {
        self.context.run_id
    }

    pub fn current_time(&self) -> f64 {
        self.scheduler.clock().current_time()
    }

    pub fn completed_steps(&self) -> u64 {
        self.scheduler.completed_steps()
    }

    pub fn description(&self) -> Option<&ModelDescription> {
        self.model.as_ref().map(LoadedModel::description)
    }

    fn require(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Send fatal errors through the release path before handing them back.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.fail_run(err);
            }
        }
        result
    }

    /// Load the package, resolve the configured variables and connect the sink.
    pub fn open(&mut self) -> Result<()> {
        self.require("open", &[LifecycleState::Unbound])?;
        let result = self.open_inner();
        self.guard(result)
    }

    fn open_inner(&mut self) -> Result<()> {
        let model = self
            .loader
            .load(&self.context.package_path)
            .map_err(LifecycleError::Bind)?;
        let measurement = model.package.file_name();
        let description = model.description().clone();
        self.model = Some(model);
        self.context.resolve(&description)?;
        let sink = self.connector.connect(&measurement)?;
        info!(
            model = %description.model_identifier,
            package = %self.context.package_path.display(),
            sink = %sink.describe(),
            inputs = self.context.inputs.len(),
            outputs = self.context.outputs.len(),
            "model opened"
        );
        self.sink = Some(sink);
        self.state = LifecycleState::Bound;
        Ok(())
    }

    /// Create the model instance and draw the next run id.
    pub fn instantiate(&mut self) -> Result<()> {
        self.require("instantiate", &[LifecycleState::Bound])?;
        let result = self.instantiate_inner();
        self.guard(result)
    }

    fn instantiate_inner(&mut self) -> Result<()> {
        let model = self.model.as_mut().ok_or(LifecycleError::InvalidState {
            operation: "instantiate",
            state: self.state,
        })?;
        let description = model.package.description();
        let request = InstantiateRequest {
            instance_name: self
                .config
                .model
                .instance_name
                .clone()
                .unwrap_or_else(|| description.model_identifier.clone()),
            guid: description.guid.clone(),
            location: model
                .package
                .location_url()
                .map_err(LifecycleError::InstantiationFailed)?,
            mime_type: twin_fmi::ffi::MIME_TYPE_SHARED_LIBRARY.to_owned(),
            timeout_ms: self.config.model.instantiate_timeout.as_secs_f64() * 1000.0,
            visible: false,
            interactive: false,
            logging_on: self.config.model.logging_on,
        };
        let handle = model
            .api
            .instantiate_slave(&request)
            .map_err(LifecycleError::InstantiationFailed)?;
        self.handle = Some(handle);
        let run_id = self.counter.next()?;
        self.context.run_id = Some(run_id);
        self.metrics.record_run_id(run_id);
        self.state = LifecycleState::Instantiated;
        info!(run_id, instance = %request.instance_name, "model instantiated");
        Ok(())
    }

    /// Initialize from t=0 with the configured stop time.
    pub fn initialize(&mut self) -> Result<()> {
        self.require("initialize", &[LifecycleState::Instantiated])?;
        let result = self.initialize_inner();
        self.guard(result)
    }

    fn initialize_inner(&mut self) -> Result<()> {
        let end_time = self.context.end_time;
        let (model, handle) = self.live("initialize")?;
        let status = model.api.initialize_slave(handle, 0.0, true, end_time);
        if !status.is_acceptable() {
            return Err(LifecycleError::InitializationFailed { status });
        }
        if status == Status::Warning {
            warn!("model initialized with warning");
        }
        self.scheduler.reset();
        if self.results.is_none() {
            if let Some(path) = &self.config.run.result_file {
                let columns = self.output_names();
                self.results = Some(ResultWriter::create(
                    path,
                    self.config.run.separator,
                    &columns,
                )?);
            }
        }
        self.state = LifecycleState::Initialized;
        info!(
            run_id = self.context.run_id,
            end_time = self.context.end_time,
            step_size = self.context.step_size,
            "model initialized"
        );
        Ok(())
    }

    fn output_names(&self) -> Vec<String> {
        match self.description() {
            Some(description) => self
                .context
                .output_descriptors(description)
                .map(|descriptor| descriptor.name.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn live(&mut self, operation: &'static str) -> Result<(&mut LoadedModel, &ModelHandle)> {
        match (self.model.as_mut(), self.handle.as_ref()) {
            (Some(model), Some(handle)) => Ok((model, handle)),
            _ => Err(LifecycleError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    /// Write every configured input value into the model.
    pub fn apply_inputs(&mut self) -> Result<()> {
        self.require(
            "apply_inputs",
            &[
                LifecycleState::Instantiated,
                LifecycleState::Initialized,
                LifecycleState::Stepping,
            ],
        )?;
        let result = self.apply_inputs_inner();
        self.guard(result)
    }

    fn apply_inputs_inner(&mut self) -> Result<()> {
        let (model, handle) = match (self.model.as_mut(), self.handle.as_ref()) {
            (Some(model), Some(handle)) => (model, handle),
            _ => {
                return Err(LifecycleError::InvalidState {
                    operation: "apply_inputs",
                    state: self.state,
                })
            }
        };
        let description = model.package.description();
        let mut accessor = VariableAccessor::new(&mut *model.api, handle);
        for (descriptor, value) in self.context.input_descriptors(description) {
            accessor
                .set_value(descriptor, value)
                .map_err(LifecycleError::ModelCallFailed)?;
            debug!(variable = %descriptor.name, %value, "input applied");
        }
        Ok(())
    }

    /// Replace the value of a configured input, adding it when absent.
    /// Takes effect on the next [`LifecycleController::apply_inputs`].
    pub fn update_input(&mut self, selector: VariableSelector, value: Value) -> Result<()> {
        if matches!(self.state, LifecycleState::Terminated | LifecycleState::Closed) {
            return Err(LifecycleError::InvalidState {
                operation: "update_input",
                state: self.state,
            });
        }
        let mut binding = InputBinding {
            selector,
            value,
            catalog_index: None,
        };
        if let Some(model) = &self.model {
            binding.bind(model.description())?;
        }
        match self
            .context
            .inputs
            .iter_mut()
            .find(|input| input.selector == binding.selector)
        {
            Some(existing) => *existing = binding,
            None => self.context.inputs.push(binding),
        }
        Ok(())
    }

    /// Toggle the model's own debug logging.
    pub fn set_debug_logging(&mut self, logging_on: bool) -> Result<()> {
        self.require(
            "set_debug_logging",
            &[
                LifecycleState::Instantiated,
                LifecycleState::Initialized,
                LifecycleState::Stepping,
            ],
        )?;
        let (model, handle) = self.live("set_debug_logging")?;
        let status = model.api.set_debug_logging(handle, logging_on);
        if !status.is_acceptable() {
            warn!(%status, logging_on, "model refused debug logging change");
        }
        Ok(())
    }

    /// Return the instance to its freshly instantiated state. Non-fatal on failure.
    pub fn reset(&mut self) -> Result<()> {
        self.require(
            "reset",
            &[LifecycleState::Initialized, LifecycleState::Stepping],
        )?;
        let (model, handle) = self.live("reset")?;
        let status = model.api.reset_slave(handle);
        if !status.is_acceptable() {
            warn!(%status, state = %self.state, "model reset failed");
            return Err(LifecycleError::ResetFailed { status });
        }
        self.scheduler.reset();
        self.state = LifecycleState::Instantiated;
        info!(run_id = self.context.run_id, "model reset");
        Ok(())
    }

    /// Advance one step; the first call after initialize also emits t=0.
    pub fn step(&mut self) -> Result<StepOutcome> {
        self.require(
            "step",
            &[LifecycleState::Initialized, LifecycleState::Stepping],
        )?;
        let result = self.step_inner();
        self.guard(result)
    }

    fn step_inner(&mut self) -> Result<StepOutcome> {
        let state = self.state;
        let invalid = LifecycleError::InvalidState {
            operation: "step",
            state,
        };
        let (Some(model), Some(handle), Some(sink)) =
            (self.model.as_mut(), self.handle.as_ref(), self.sink.as_mut())
        else {
            return Err(invalid);
        };
        let mut env = StepEnv {
            api: &mut *model.api,
            handle,
            description: model.package.description(),
            context: &mut self.context,
            sink: &mut **sink,
            results: self.results.as_mut(),
            metrics: &self.metrics,
        };
        let outcome = self.scheduler.step(&mut env)?;
        self.state = LifecycleState::Stepping;
        Ok(outcome)
    }

    /// Step until the end time is reached.
    pub fn run(&mut self) -> Result<RunSummary> {
        loop {
            if let StepOutcome::Finished { .. } = self.step()? {
                break;
            }
        }
        let summary = self.summary();
        info!(
            run_id = summary.run_id,
            steps = summary.steps,
            step_size = summary.step_size,
            start_time = summary.start_time,
            end_time = summary.end_time,
            "simulation finished"
        );
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.context.run_id,
            steps: self.scheduler.completed_steps(),
            step_size: self.context.step_size,
            start_time: 0.0,
            end_time: self.scheduler.clock().current_time(),
            batches: self.metrics.batches(),
        }
    }

    /// Terminate the instance. Further model calls are rejected.
    pub fn terminate(&mut self) -> Result<()> {
        self.require(
            "terminate",
            &[
                LifecycleState::Instantiated,
                LifecycleState::Initialized,
                LifecycleState::Stepping,
            ],
        )?;
        if self.state != LifecycleState::Instantiated {
            let (model, handle) = self.live("terminate")?;
            let status = model.api.terminate_slave(handle);
            if !status.is_acceptable() {
                warn!(%status, "model terminate reported failure");
            }
        }
        self.state = LifecycleState::Terminated;
        debug!(run_id = self.context.run_id, "model terminated");
        Ok(())
    }

    /// Normal exit: terminate when needed, free, unbind, remove files, close the sink.
    pub fn close(&mut self) -> Result<()> {
        if self.state == LifecycleState::Closed {
            return Ok(());
        }
        if matches!(
            self.state,
            LifecycleState::Instantiated | LifecycleState::Initialized | LifecycleState::Stepping
        ) {
            self.terminate()?;
        }
        let mut first_error: Option<LifecycleError> = None;
        if let Some(results) = self.results.take() {
            if let Err(err) = results.finish() {
                first_error.get_or_insert(err.into());
            }
        }
        if let Err(err) = self.release() {
            first_error.get_or_insert(err);
        }
        self.export_metrics();
        self.state = LifecycleState::Closed;
        info!(run_id = self.context.run_id, "run closed");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Free the instance, unbind, remove unpacked files and close the sink.
    fn release(&mut self) -> Result<()> {
        let mut first_error: Option<LifecycleError> = None;
        if let Some(model) = self.model.as_mut() {
            if let Some(handle) = self.handle.take() {
                model.api.free_slave_instance(handle);
            }
            if let Err(err) = model.release() {
                first_error.get_or_insert(LifecycleError::Bind(err));
            }
        }
        self.model = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close() {
                first_error.get_or_insert(err.into());
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Best-effort release after a fatal error. Never fails.
    pub fn fail_run(&mut self, cause: &LifecycleError) {
        if self.state == LifecycleState::Closed {
            return;
        }
        error!(state = %self.state, run_id = self.context.run_id, error = %cause, "run failed");
        if matches!(
            self.state,
            LifecycleState::Initialized | LifecycleState::Stepping
        ) {
            if let Ok((model, handle)) = self.live("terminate") {
                let status = model.api.terminate_slave(handle);
                debug!(%status, "terminate during failure cleanup");
            }
        }
        self.results = None;
        if let Err(err) = self.release() {
            warn!(error = %err, "cleanup after failure was incomplete");
        }
        self.export_metrics();
        self.state = LifecycleState::Closed;
    }

    fn export_metrics(&self) {
        if let Some(path) = &self.config.metrics.textfile {
            if let Err(err) = self.metrics.export_textfile(path) {
                warn!(error = %err, "failed to export run metrics");
            }
        }
    }

    /// Catalog entry behind `selector`, available once the model is open.
    pub fn describe_variable(&self, selector: &VariableSelector) -> Result<VariableInfo> {
        let description = self.description().ok_or(LifecycleError::InvalidState {
            operation: "describe_variable",
            state: self.state,
        })?;
        description
            .resolve(selector)
            .map(VariableInfo::from)
            .ok_or_else(|| {
                twin_common::ConfigError::UnknownVariable(selector.to_string()).into()
            })
    }

    /// Current value of any catalog variable.
    pub fn read_variable(&mut self, selector: &VariableSelector) -> Result<Value> {
        self.require(
            "read_variable",
            &[
                LifecycleState::Instantiated,
                LifecycleState::Initialized,
                LifecycleState::Stepping,
            ],
        )?;
        let (model, handle) = self.live("read_variable")?;
        let description = model.package.description();
        let descriptor = description.resolve(selector).ok_or_else(|| {
            LifecycleError::Config(twin_common::ConfigError::UnknownVariable(
                selector.to_string(),
            ))
        })?;
        VariableAccessor::new(&mut *model.api, handle)
            .get_value(descriptor)
            .map_err(LifecycleError::ModelCallFailed)
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if self.state != LifecycleState::Closed
            && (self.model.is_some() || self.sink.is_some() || self.handle.is_some())
        {
            warn!(state = %self.state, "controller dropped without close; releasing");
            if matches!(
                self.state,
                LifecycleState::Initialized | LifecycleState::Stepping
            ) {
                if let Ok((model, handle)) = self.live("terminate") {
                    model.api.terminate_slave(handle);
                }
            }
            if let Err(err) = self.release() {
                warn!(error = %err, "release on drop was incomplete");
            }
            self.state = LifecycleState::Closed;
        }
    }
}
