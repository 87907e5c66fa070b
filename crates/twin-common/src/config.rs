//! ---
//! twin_section: "01-core-functionality"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Run parameter loading and validation."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogFormat;

fn default_end_time() -> f64 {
    1.0
}

fn default_step_size() -> f64 {
    0.1
}

fn default_instantiate_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_sink_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_sink_port() -> u16 {
    8086
}

fn default_database() -> String {
    "twin".to_owned()
}

fn default_counter_file() -> PathBuf {
    PathBuf::from("guid.txt")
}

fn default_separator() -> char {
    ','
}

fn default_logging_directory() -> Option<PathBuf> {
    Some(PathBuf::from("logs"))
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Malformed run parameters, raised before any model or sink resource is acquired.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("model package path must not be empty")]
    MissingPackage,
    #[error("step size must be a positive finite number, got {0}")]
    InvalidStepSize(f64),
    #[error("end time must be a non-negative finite number, got {0}")]
    InvalidEndTime(f64),
    #[error("sink port must be non-zero")]
    InvalidPort,
    #[error("csv separator must be a single ascii character other than a quote or newline, got {0:?}")]
    InvalidSeparator(char),
    #[error("variable selector must name exactly one of index, reference or name: {0}")]
    InvalidSelector(String),
    #[error("cannot parse value literal {0:?}")]
    InvalidLiteral(String),
    #[error("variable {0} is not part of the model catalog")]
    UnknownVariable(String),
    #[error("variable {selector} cannot take value {value}: {reason}")]
    IncompatibleValue {
        selector: String,
        value: String,
        reason: String,
    },
}

/// Complete parameter set for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub inputs: Vec<InputAssignment>,
    #[serde(default)]
    pub outputs: Vec<VariableSpec>,
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Free-form labels carried into the run summary log.
    #[serde(default)]
    pub labels: IndexMap<String, String>,
}

/// Metadata describing where a [`RunConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedRunConfig {
    pub config: RunConfig,
    pub source: PathBuf,
}

impl RunConfig {
    pub const ENV_CONFIG_PATH: &str = "TWIN_CONFIG";

    /// Build a configuration for a package with every other section defaulted.
    pub fn for_package(package: impl Into<PathBuf>) -> Self {
        Self {
            model: ModelConfig::new(package),
            sink: SinkConfig::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            run: RunSettings::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            labels: IndexMap::new(),
        }
    }

    /// Load the run file, honouring the `TWIN_CONFIG` override before the explicit path.
    pub fn load_with_source(explicit: Option<&Path>) -> Result<Option<LoadedRunConfig>> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(Some(LoadedRunConfig {
                    config,
                    source: path,
                }));
            }
        }
        match explicit {
            Some(path) => {
                let config = Self::from_path(path)?;
                Ok(Some(LoadedRunConfig {
                    config,
                    source: path.to_path_buf(),
                }))
            }
            None => Ok(None),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading run configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read run file {}", path.display()))?;
        contents
            .parse::<RunConfig>()
            .with_context(|| format!("invalid run file {}", path.display()))
    }

    /// Validate structural invariants. Variable names are checked later against the catalog.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.model.validate()?;
        self.sink.validate()?;
        self.run.validate()?;
        for input in &self.inputs {
            input.variable.selector()?;
        }
        for output in &self.outputs {
            output.selector()?;
        }
        Ok(())
    }
}

impl FromStr for RunConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: RunConfig =
            toml::from_str(content).with_context(|| "failed to parse run configuration")?;
        config.validate().map_err(|err| anyhow!(err))?;
        Ok(config)
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub package: PathBuf,
    #[serde(default = "default_end_time")]
    pub end_time: f64,
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    /// Forwarded to the model as its debug logging flag.
    #[serde(default)]
    pub logging_on: bool,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default = "default_instantiate_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub instantiate_timeout: Duration,
}

impl ModelConfig {
    pub fn new(package: impl Into<PathBuf>) -> Self {
        Self {
            package: package.into(),
            end_time: default_end_time(),
            step_size: default_step_size(),
            logging_on: false,
            instance_name: None,
            instantiate_timeout: default_instantiate_timeout(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.package.as_os_str().is_empty() {
            return Err(ConfigError::MissingPackage);
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(ConfigError::InvalidStepSize(self.step_size));
        }
        if !self.end_time.is_finite() || self.end_time < 0.0 {
            return Err(ConfigError::InvalidEndTime(self.end_time));
        }
        Ok(())
    }
}

/// Line-protocol endpoint receiving one batch per step.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_host")]
    pub host: String,
    #[serde(default = "default_sink_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub io_timeout: Option<Duration>,
}

impl SinkConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: default_sink_host(),
            port: default_sink_port(),
            database: default_database(),
            username: String::new(),
            password: String::new(),
            io_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default = "default_counter_file")]
    pub counter_file: PathBuf,
    #[serde(default)]
    pub result_file: Option<PathBuf>,
    #[serde(default = "default_separator")]
    pub separator: char,
}

impl RunSettings {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.separator.is_ascii() || matches!(self.separator, '"' | '\n' | '\r') {
            return Err(ConfigError::InvalidSeparator(self.separator));
        }
        Ok(())
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            counter_file: default_counter_file(),
            result_file: None,
            separator: default_separator(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written when the run closes.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// Catalog position, value reference, or variable name identifying one model variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableSelector {
    Index(usize),
    Reference(u32),
    Name(String),
}

impl fmt::Display for VariableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableSelector::Index(index) => write!(f, "index:{}", index),
            VariableSelector::Reference(reference) => write!(f, "ref:{}", reference),
            VariableSelector::Name(name) => f.write_str(name),
        }
    }
}

impl FromStr for VariableSelector {
    type Err = ConfigError;

    /// `index:<n>` and `ref:<n>` select numerically; anything else is a variable name.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidSelector(s.to_owned()));
        }
        if let Some(rest) = trimmed.strip_prefix("index:") {
            return rest
                .parse()
                .map(VariableSelector::Index)
                .map_err(|_| ConfigError::InvalidSelector(s.to_owned()));
        }
        if let Some(rest) = trimmed.strip_prefix("ref:") {
            return rest
                .parse()
                .map(VariableSelector::Reference)
                .map_err(|_| ConfigError::InvalidSelector(s.to_owned()));
        }
        Ok(VariableSelector::Name(trimmed.to_owned()))
    }
}

/// TOML form of a selector: exactly one of the three keys must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl VariableSpec {
    pub fn selector(&self) -> std::result::Result<VariableSelector, ConfigError> {
        match (&self.index, &self.reference, &self.name) {
            (Some(index), None, None) => Ok(VariableSelector::Index(*index)),
            (None, Some(reference), None) => Ok(VariableSelector::Reference(*reference)),
            (None, None, Some(name)) if !name.trim().is_empty() => {
                Ok(VariableSelector::Name(name.trim().to_owned()))
            }
            _ => Err(ConfigError::InvalidSelector(format!("{:?}", self))),
        }
    }
}

impl From<VariableSelector> for VariableSpec {
    fn from(selector: VariableSelector) -> Self {
        match selector {
            VariableSelector::Index(index) => Self {
                index: Some(index),
                ..Self::default()
            },
            VariableSelector::Reference(reference) => Self {
                reference: Some(reference),
                ..Self::default()
            },
            VariableSelector::Name(name) => Self {
                name: Some(name),
                ..Self::default()
            },
        }
    }
}

/// One value applied to a model input before the first step and on every re-application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAssignment {
    #[serde(flatten)]
    pub variable: VariableSpec,
    pub value: ConfigValue,
}

impl InputAssignment {
    pub fn new(selector: VariableSelector, value: ConfigValue) -> Self {
        Self {
            variable: selector.into(),
            value,
        }
    }
}

impl FromStr for InputAssignment {
    type Err = ConfigError;

    /// Parses the CLI form `<selector>=<literal>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (selector, literal) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidSelector(s.to_owned()))?;
        Ok(Self::new(selector.parse()?, literal.parse()?))
    }
}

/// Untyped literal as written in a run file or on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(value) => write!(f, "{}", value),
            ConfigValue::Integer(value) => write!(f, "{}", value),
            ConfigValue::Real(value) => write!(f, "{}", value),
            ConfigValue::Text(value) => write!(f, "{:?}", value),
        }
    }
}

impl FromStr for ConfigValue {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidLiteral(s.to_owned()));
        }
        match trimmed {
            "true" => return Ok(ConfigValue::Bool(true)),
            "false" => return Ok(ConfigValue::Bool(false)),
            _ => {}
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return Ok(ConfigValue::Integer(value));
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Ok(ConfigValue::Real(value));
        }
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(trimmed);
        Ok(ConfigValue::Text(unquoted.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [model]
        package = "models/bouncingBall.fmu"
        end_time = 4.0
        step_size = 0.01
        instantiate_timeout = 2500

        [sink]
        host = "10.0.0.5"
        port = 8087
        database = "rt_test"
        username = "rw_db"
        password = "secret"
        io_timeout = 5

        [[inputs]]
        name = "e"
        value = 0.7

        [[inputs]]
        index = 2
        value = 3

        outputs = [{ name = "h" }, { reference = 1 }]

        [run]
        counter_file = "state/guid.txt"
        result_file = "result.csv"
        separator = ";"

        [labels]
        site = "lab-a"
    "#;

    #[test]
    fn parses_full_run_file() {
        let config: RunConfig = SAMPLE.parse().expect("valid run file");
        assert_eq!(config.model.end_time, 4.0);
        assert_eq!(config.model.step_size, 0.01);
        assert_eq!(config.model.instantiate_timeout, Duration::from_millis(2500));
        assert_eq!(config.sink.address(), "10.0.0.5:8087");
        assert_eq!(config.sink.io_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(
            config.inputs[0].variable.selector().unwrap(),
            VariableSelector::Name("e".into())
        );
        assert_eq!(config.inputs[0].value, ConfigValue::Real(0.7));
        assert_eq!(config.inputs[1].value, ConfigValue::Integer(3));
        assert_eq!(
            config.outputs[1].selector().unwrap(),
            VariableSelector::Reference(1)
        );
        assert_eq!(config.run.separator, ';');
        assert_eq!(config.labels.get("site").map(String::as_str), Some("lab-a"));
    }

    #[test]
    fn minimal_run_file_uses_defaults() {
        let config: RunConfig = "[model]\npackage = \"m.fmu\"\n".parse().unwrap();
        assert_eq!(config.model.end_time, 1.0);
        assert_eq!(config.model.step_size, 0.1);
        assert_eq!(config.sink.port, 8086);
        assert_eq!(config.run.counter_file, PathBuf::from("guid.txt"));
        assert!(config.run.result_file.is_none());
        assert!(config.inputs.is_empty());
    }

    #[test]
    fn rejects_non_positive_step() {
        let mut config = RunConfig::for_package("m.fmu");
        config.model.step_size = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidStepSize(0.0)));
        config.model.step_size = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_selector_with_two_keys() {
        let spec = VariableSpec {
            index: Some(1),
            name: Some("x".into()),
            ..VariableSpec::default()
        };
        assert!(matches!(
            spec.selector(),
            Err(ConfigError::InvalidSelector(_))
        ));
    }

    #[test]
    fn parses_cli_assignments() {
        let assignment: InputAssignment = "index:3=2.5".parse().unwrap();
        assert_eq!(
            assignment.variable.selector().unwrap(),
            VariableSelector::Index(3)
        );
        assert_eq!(assignment.value, ConfigValue::Real(2.5));

        let assignment: InputAssignment = "ref:7=true".parse().unwrap();
        assert_eq!(
            assignment.variable.selector().unwrap(),
            VariableSelector::Reference(7)
        );
        assert_eq!(assignment.value, ConfigValue::Bool(true));

        let assignment: InputAssignment = "label=\"hello\"".parse().unwrap();
        assert_eq!(assignment.value, ConfigValue::Text("hello".into()));

        assert!("no-equals-sign".parse::<InputAssignment>().is_err());
    }
}
