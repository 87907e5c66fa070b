//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Type-dispatched single-variable get and set."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use tracing::{trace, warn};

use crate::binding::{FmiApi, ModelHandle};
use crate::catalog::{VariableDescriptor, VariableType};
use crate::ffi::Status;
use crate::value::Value;
use crate::{FmiError, Result};

/// Translates catalog entries into typed ABI calls against one instance.
pub struct VariableAccessor<'a> {
    api: &'a mut dyn FmiApi,
    handle: &'a ModelHandle,
}

impl<'a> VariableAccessor<'a> {
    pub fn new(api: &'a mut dyn FmiApi, handle: &'a ModelHandle) -> Self {
        Self { api, handle }
    }

    pub fn set_value(&mut self, descriptor: &VariableDescriptor, value: &Value) -> Result<()> {
        let coerced = value.coerce_to(descriptor.variable_type, &descriptor.name)?;
        let refs = [descriptor.reference];
        let status = match coerced {
            Value::Real(value) => self.api.set_real(self.handle, &refs, &[value]),
            // coerce_to keeps integers inside the 32-bit range
            Value::Integer(value) => self.api.set_integer(self.handle, &refs, &[value as i32]),
            Value::Boolean(value) => self.api.set_boolean(self.handle, &refs, &[value]),
            Value::String(value) => self.api.set_string(self.handle, &refs, &[value.as_str()]),
        };
        trace!(variable = %descriptor.name, reference = descriptor.reference, %value, %status, "set");
        check("set", descriptor, status)
    }

    pub fn get_value(&mut self, descriptor: &VariableDescriptor) -> Result<Value> {
        let refs = [descriptor.reference];
        let (status, value) = match descriptor.variable_type {
            VariableType::Real => {
                let mut out = [0.0];
                let status = self.api.get_real(self.handle, &refs, &mut out);
                (status, Value::Real(out[0]))
            }
            VariableType::Integer | VariableType::Enumeration => {
                let mut out = [0];
                let status = self.api.get_integer(self.handle, &refs, &mut out);
                (status, Value::Integer(i64::from(out[0])))
            }
            VariableType::Boolean => {
                let mut out = [false];
                let status = self.api.get_boolean(self.handle, &refs, &mut out);
                (status, Value::Boolean(out[0]))
            }
            VariableType::String => {
                let mut out = [String::new()];
                let status = self.api.get_string(self.handle, &refs, &mut out);
                let [text] = out;
                (status, Value::String(text))
            }
        };
        check("get", descriptor, status)?;
        Ok(value)
    }
}

fn check(operation: &'static str, descriptor: &VariableDescriptor, status: Status) -> Result<()> {
    if status == Status::Warning {
        warn!(variable = %descriptor.name, operation, "model reported warning");
    }
    if status.is_acceptable() {
        Ok(())
    } else {
        Err(FmiError::ModelCallFailed {
            operation,
            variable: descriptor.name.clone(),
            status,
        })
    }
}
