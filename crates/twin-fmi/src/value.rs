//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Typed variable values and lossless coercion."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fmt;

use serde::Serialize;
use twin_common::ConfigValue;

use crate::catalog::VariableType;
use crate::{FmiError, Result};

/// Largest integer magnitude an f64 represents exactly.
const EXACT_F64_INTEGER: i64 = 1 << 53;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Real(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Real(_) => "real",
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
        }
    }

    /// Numeric view used for the output buffer and result rows.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            Value::Boolean(value) => Some(if *value { 1.0 } else { 0.0 }),
            Value::String(_) => None,
        }
    }

    /// Convert into the representation `target` expects. Only lossless
    /// conversions succeed; Integer and Enumeration results fit in 32 bits.
    pub fn coerce_to(&self, target: VariableType, variable: &str) -> Result<Value> {
        let mismatch = || FmiError::TypeMismatch {
            variable: variable.to_owned(),
            expected: target,
            found: self.to_string(),
        };
        match (target, self) {
            (VariableType::Real, Value::Real(value)) => Ok(Value::Real(*value)),
            (VariableType::Real, Value::Integer(value)) if value.abs() <= EXACT_F64_INTEGER => {
                Ok(Value::Real(*value as f64))
            }
            (VariableType::Integer | VariableType::Enumeration, Value::Integer(value)) => {
                i32::try_from(*value)
                    .map(|narrow| Value::Integer(narrow as i64))
                    .map_err(|_| mismatch())
            }
            (VariableType::Integer | VariableType::Enumeration, Value::Real(value))
                if value.is_finite()
                    && value.fract() == 0.0
                    && *value >= i32::MIN as f64
                    && *value <= i32::MAX as f64 =>
            {
                Ok(Value::Integer(*value as i64))
            }
            (VariableType::Boolean, Value::Boolean(value)) => Ok(Value::Boolean(*value)),
            (VariableType::Boolean, Value::Integer(value @ (0 | 1))) => {
                Ok(Value::Boolean(*value == 1))
            }
            (VariableType::Boolean, Value::Real(value)) if *value == 0.0 || *value == 1.0 => {
                Ok(Value::Boolean(*value == 1.0))
            }
            (VariableType::String, Value::String(value)) => Ok(Value::String(value.clone())),
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Real(value) => write!(f, "{}", value),
            Value::Integer(value) => write!(f, "{}", value),
            Value::Boolean(value) => write!(f, "{}", value),
            Value::String(value) => write!(f, "{:?}", value),
        }
    }
}

impl From<ConfigValue> for Value {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Bool(value) => Value::Boolean(value),
            ConfigValue::Integer(value) => Value::Integer(value),
            ConfigValue::Real(value) => Value::Real(value),
            ConfigValue::Text(value) => Value::String(value),
        }
    }
}

impl From<&ConfigValue> for Value {
    fn from(value: &ConfigValue) -> Self {
        value.clone().into()
    }
}
