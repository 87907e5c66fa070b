//! ---
//! twin_section: "08-cli"
//! twin_subsection: "binary"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "The run subcommand: configuration overlay and the single-shot simulation."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use twin_common::{
    init_tracing, InputAssignment, RunConfig, VariableSelector, VariableSpec, VersionInfo,
};
use twin_core::{LifecycleController, LifecycleError, RunSummary};
use tracing::{error, info, warn};
use twin_metrics::{new_registry, RunMetrics};

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    #[arg(value_name = "FMU", help = "Model package (.fmu archive or unpacked directory)")]
    pub package: Option<PathBuf>,

    #[arg(long, help = "Simulation end time in seconds")]
    pub end_time: Option<f64>,

    #[arg(long = "step", help = "Fixed communication step in seconds")]
    pub step_size: Option<f64>,

    #[arg(
        long = "set",
        value_name = "SELECTOR=VALUE",
        help = "Input assignment; selector is a name, index:<n> or ref:<n>"
    )]
    pub inputs: Vec<InputAssignment>,

    #[arg(long = "get", value_name = "SELECTOR", help = "Output to record each step")]
    pub outputs: Vec<VariableSelector>,

    #[arg(long, value_name = "HOST:PORT", help = "Telemetry endpoint")]
    pub sink: Option<String>,

    #[arg(long, help = "Telemetry database name")]
    pub database: Option<String>,

    #[arg(long, env = "TWIN_SINK_USER", help = "Telemetry user name")]
    pub username: Option<String>,

    #[arg(long, env = "TWIN_SINK_PASSWORD", hide_env_values = true, help = "Telemetry password")]
    pub password: Option<String>,

    #[arg(long, value_name = "FILE", help = "Write a delimited result file")]
    pub result_file: Option<PathBuf>,

    #[arg(long, help = "Result file column separator")]
    pub separator: Option<char>,

    #[arg(long, value_name = "FILE", help = "Persistent run counter file")]
    pub counter_file: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Export run metrics in Prometheus text format")]
    pub metrics_textfile: Option<PathBuf>,

    #[arg(long, help = "Ask the model for debug logging")]
    pub logging_on: bool,
}

/// Run file (if any) overlaid by command line flags, then validated.
pub fn resolve_config(config_path: Option<&Path>, args: RunArgs) -> Result<RunConfig> {
    let mut config = match RunConfig::load_with_source(config_path)? {
        Some(loaded) => {
            info!(source = %loaded.source.display(), "run file loaded");
            loaded.config
        }
        None => match &args.package {
            Some(package) => RunConfig::for_package(package),
            None => bail!("no model package given; pass FMU or --config"),
        },
    };
    if let Some(package) = args.package {
        config.model.package = package;
    }
    if let Some(end_time) = args.end_time {
        config.model.end_time = end_time;
    }
    if let Some(step_size) = args.step_size {
        config.model.step_size = step_size;
    }
    if args.logging_on {
        config.model.logging_on = true;
    }
    for input in args.inputs {
        match config
            .inputs
            .iter_mut()
            .find(|existing| existing.variable == input.variable)
        {
            Some(existing) => *existing = input,
            None => config.inputs.push(input),
        }
    }
    for output in args.outputs {
        let spec: VariableSpec = output.into();
        if !config.outputs.contains(&spec) {
            config.outputs.push(spec);
        }
    }
    if let Some(sink) = args.sink {
        let (host, port) = sink
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("sink must be HOST:PORT, got {sink}"))?;
        config.sink.host = host.to_owned();
        config.sink.port = port
            .parse()
            .with_context(|| format!("invalid sink port {port}"))?;
    }
    if let Some(database) = args.database {
        config.sink.database = database;
    }
    if let Some(username) = args.username {
        config.sink.username = username;
    }
    if let Some(password) = args.password {
        config.sink.password = password;
    }
    if let Some(result_file) = args.result_file {
        config.run.result_file = Some(result_file);
    }
    if let Some(separator) = args.separator {
        config.run.separator = separator;
    }
    if let Some(counter_file) = args.counter_file {
        config.run.counter_file = counter_file;
    }
    if let Some(textfile) = args.metrics_textfile {
        config.metrics.textfile = Some(textfile);
    }
    config.validate().context("invalid run configuration")?;
    Ok(config)
}

pub fn execute(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = resolve_config(config_path, args)?;
    init_tracing("twin-run", &config.logging)?;
    let version = VersionInfo::current();
    info!(
        version = %version.cli_string(),
        package = %config.model.package.display(),
        end_time = config.model.end_time,
        step_size = config.model.step_size,
        sink = %config.sink.address(),
        "starting simulation"
    );

    let labels = config.labels.clone();
    let metrics = RunMetrics::new(new_registry())?;
    let mut controller = LifecycleController::native(config)
        .context("invalid run configuration")?
        .with_metrics(metrics);
    let started = Instant::now();
    match simulate(&mut controller) {
        Ok(summary) => {
            info!(
                run_id = summary.run_id,
                steps = summary.steps,
                batches = summary.batches,
                elapsed_ms = started.elapsed().as_millis() as u64,
                labels = ?labels,
                "run complete"
            );
            println!("Simulation completed successfully");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, time = controller.current_time(), "simulation aborted");
            controller.fail_run(&err);
            println!("Simulation failed");
            Err(err.into())
        }
    }
}

fn simulate(controller: &mut LifecycleController) -> Result<RunSummary, LifecycleError> {
    controller.open()?;
    controller.instantiate()?;
    controller.initialize()?;
    controller.apply_inputs()?;
    let summary = controller.run()?;
    let outputs: Vec<VariableSelector> = controller
        .context()
        .outputs
        .iter()
        .map(|output| output.selector.clone())
        .collect();
    for selector in &outputs {
        match controller.read_variable(selector) {
            Ok(value) => info!(variable = %selector, %value, "final value"),
            Err(err) => warn!(variable = %selector, error = %err, "final value unavailable"),
        }
    }
    controller.close()?;
    Ok(summary)
}
