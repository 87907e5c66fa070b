//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Model description parsing and variable catalog lookup."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! Read-only variable catalog built from `modelDescription.xml`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;
use twin_common::VariableSelector;

use crate::value::Value;
use crate::{FmiError, Result};

pub const MODEL_DESCRIPTION_FILE: &str = "modelDescription.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Real,
    Integer,
    Enumeration,
    Boolean,
    String,
}

impl VariableType {
    /// Numeric code printed by the catalog listing.
    pub fn type_code(self) -> u8 {
        match self {
            VariableType::Real => 1,
            VariableType::Integer => 2,
            VariableType::Enumeration => 3,
            VariableType::Boolean => 4,
            VariableType::String => 5,
        }
    }

    fn from_element(tag: &str) -> Option<Self> {
        match tag {
            "Real" => Some(VariableType::Real),
            "Integer" => Some(VariableType::Integer),
            "Enumeration" => Some(VariableType::Enumeration),
            "Boolean" => Some(VariableType::Boolean),
            "String" => Some(VariableType::String),
            _ => None,
        }
    }

    fn parse_start(self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            VariableType::Real => raw.parse().ok().map(Value::Real),
            VariableType::Integer | VariableType::Enumeration => {
                raw.parse().ok().map(Value::Integer)
            }
            VariableType::Boolean => match raw {
                "true" | "1" => Some(Value::Boolean(true)),
                "false" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            VariableType::String => Some(Value::String(raw.to_owned())),
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableType::Real => "Real",
            VariableType::Integer => "Integer",
            VariableType::Enumeration => "Enumeration",
            VariableType::Boolean => "Boolean",
            VariableType::String => "String",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Causality {
    Input,
    Output,
    Parameter,
    CalculatedParameter,
    Local,
    Internal,
    Independent,
    None,
}

impl Causality {
    pub fn as_str(self) -> &'static str {
        match self {
            Causality::Input => "input",
            Causality::Output => "output",
            Causality::Parameter => "parameter",
            Causality::CalculatedParameter => "calculatedParameter",
            Causality::Local => "local",
            Causality::Internal => "internal",
            Causality::Independent => "independent",
            Causality::None => "none",
        }
    }
}

impl FromStr for Causality {
    type Err = FmiError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "input" => Causality::Input,
            "output" => Causality::Output,
            "parameter" => Causality::Parameter,
            "calculatedParameter" => Causality::CalculatedParameter,
            "local" => Causality::Local,
            "internal" => Causality::Internal,
            "independent" => Causality::Independent,
            "none" => Causality::None,
            other => return Err(FmiError::Catalog(format!("unknown causality {other:?}"))),
        })
    }
}

impl fmt::Display for Causality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variability {
    Constant,
    Fixed,
    Tunable,
    Parameter,
    Discrete,
    Continuous,
}

impl FromStr for Variability {
    type Err = FmiError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "constant" => Variability::Constant,
            "fixed" => Variability::Fixed,
            "tunable" => Variability::Tunable,
            "parameter" => Variability::Parameter,
            "discrete" => Variability::Discrete,
            "continuous" => Variability::Continuous,
            other => return Err(FmiError::Catalog(format!("unknown variability {other:?}"))),
        })
    }
}

/// One `ScalarVariable` entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableDescriptor {
    pub index: usize,
    pub reference: u32,
    pub name: String,
    pub variable_type: VariableType,
    pub causality: Causality,
    pub variability: Variability,
    pub description: Option<String>,
    pub start: Option<Value>,
}

impl VariableDescriptor {
    pub fn is_input(&self) -> bool {
        self.causality == Causality::Input
    }

    pub fn is_output(&self) -> bool {
        self.causality == Causality::Output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DefaultExperiment {
    pub start_time: Option<f64>,
    pub stop_time: Option<f64>,
    pub tolerance: Option<f64>,
}

/// Static model metadata. Immutable once parsed.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescription {
    pub fmi_version: String,
    pub model_name: String,
    pub model_identifier: String,
    pub guid: String,
    pub description: Option<String>,
    pub generation_tool: Option<String>,
    pub default_experiment: Option<DefaultExperiment>,
    variables: Vec<VariableDescriptor>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl ModelDescription {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let description = contents.parse::<ModelDescription>()?;
        debug!(
            path = %path.display(),
            model = %description.model_identifier,
            variables = description.variables.len(),
            "parsed model description"
        );
        Ok(description)
    }

    pub fn variables(&self) -> &[VariableDescriptor] {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variable(&self, index: usize) -> Option<&VariableDescriptor> {
        self.variables.get(index)
    }

    /// Aliases share references; the first catalog entry wins unless a type narrows it.
    pub fn by_reference(
        &self,
        reference: u32,
        variable_type: Option<VariableType>,
    ) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|variable| {
            variable.reference == reference
                && variable_type.map_or(true, |kind| variable.variable_type == kind)
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&VariableDescriptor> {
        self.by_name.get(name).map(|index| &self.variables[*index])
    }

    pub fn resolve(&self, selector: &VariableSelector) -> Option<&VariableDescriptor> {
        match selector {
            VariableSelector::Index(index) => self.variable(*index),
            VariableSelector::Reference(reference) => self.by_reference(*reference, None),
            VariableSelector::Name(name) => self.by_name(name),
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter().filter(|variable| variable.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter().filter(|variable| variable.is_output())
    }
}

impl FromStr for ModelDescription {
    type Err = FmiError;

    fn from_str(xml: &str) -> Result<Self> {
        let document = roxmltree::Document::parse(xml)?;
        let root = document.root_element();
        if root.tag_name().name() != "fmiModelDescription" {
            return Err(FmiError::Catalog(format!(
                "unexpected root element {}",
                root.tag_name().name()
            )));
        }
        let required = |name: &str| {
            root.attribute(name)
                .map(str::to_owned)
                .ok_or_else(|| FmiError::Catalog(format!("missing attribute {name}")))
        };
        let fmi_version = required("fmiVersion")?;
        let model_name = required("modelName")?;
        let model_identifier = required("modelIdentifier")?;
        let guid = required("guid")?;

        let default_experiment = root
            .children()
            .find(|node| node.has_tag_name("DefaultExperiment"))
            .map(|node| DefaultExperiment {
                start_time: node.attribute("startTime").and_then(|v| v.parse().ok()),
                stop_time: node.attribute("stopTime").and_then(|v| v.parse().ok()),
                tolerance: node.attribute("tolerance").and_then(|v| v.parse().ok()),
            });

        let mut variables = Vec::new();
        let mut by_name = HashMap::new();
        if let Some(model_variables) = root
            .children()
            .find(|node| node.has_tag_name("ModelVariables"))
        {
            for node in model_variables
                .children()
                .filter(|node| node.has_tag_name("ScalarVariable"))
            {
                let variable = parse_scalar_variable(node, variables.len())?;
                by_name.entry(variable.name.clone()).or_insert(variable.index);
                variables.push(variable);
            }
        }

        Ok(Self {
            fmi_version,
            model_name,
            model_identifier,
            guid,
            description: root.attribute("description").map(str::to_owned),
            generation_tool: root.attribute("generationTool").map(str::to_owned),
            default_experiment,
            variables,
            by_name,
        })
    }
}

fn parse_scalar_variable(node: roxmltree::Node<'_, '_>, index: usize) -> Result<VariableDescriptor> {
    let name = node
        .attribute("name")
        .ok_or_else(|| FmiError::Catalog(format!("ScalarVariable #{index} has no name")))?
        .to_owned();
    let reference = node
        .attribute("valueReference")
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .ok_or_else(|| FmiError::Catalog(format!("{name}: missing or invalid valueReference")))?;
    let causality = node.attribute("causality").unwrap_or("internal").parse()?;
    let variability = node
        .attribute("variability")
        .unwrap_or("continuous")
        .parse()?;
    let type_node = node
        .children()
        .filter(|child| child.is_element())
        .find_map(|child| VariableType::from_element(child.tag_name().name()).map(|t| (t, child)));
    let (variable_type, type_node) =
        type_node.ok_or_else(|| FmiError::Catalog(format!("{name}: missing type element")))?;
    let start = type_node
        .attribute("start")
        .and_then(|raw| variable_type.parse_start(raw));

    Ok(VariableDescriptor {
        index,
        reference,
        name,
        variable_type,
        causality,
        variability,
        description: node.attribute("description").map(str::to_owned),
        start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<fmiModelDescription fmiVersion="1.0" modelName="bouncingBall"
    modelIdentifier="bouncingBall" guid="{8c4e810f-3df3-4a00-8276-176fa3c9f003}"
    numberOfContinuousStates="2" numberOfEventIndicators="1">
  <DefaultExperiment startTime="0.0" stopTime="3.0" tolerance="0.0001"/>
  <ModelVariables>
    <ScalarVariable name="h" valueReference="0" description="height, used as state">
      <Real start="1" fixed="true"/>
    </ScalarVariable>
    <ScalarVariable name="der(h)" valueReference="1" causality="output">
      <Real/>
    </ScalarVariable>
    <ScalarVariable name="e" valueReference="4" variability="parameter" causality="input">
      <Real start="0.7"/>
    </ScalarVariable>
    <ScalarVariable name="counter" valueReference="0" causality="output">
      <Integer start="3"/>
    </ScalarVariable>
    <ScalarVariable name="enabled" valueReference="0" causality="input">
      <Boolean start="true"/>
    </ScalarVariable>
  </ModelVariables>
</fmiModelDescription>"#;

    #[test]
    fn parses_header_and_variables() {
        let description: ModelDescription = DESCRIPTION.parse().unwrap();
        assert_eq!(description.model_identifier, "bouncingBall");
        assert_eq!(description.guid, "{8c4e810f-3df3-4a00-8276-176fa3c9f003}");
        assert_eq!(description.len(), 5);
        let experiment = description.default_experiment.unwrap();
        assert_eq!(experiment.stop_time, Some(3.0));

        let h = description.by_name("h").unwrap();
        assert_eq!(h.causality, Causality::Internal);
        assert_eq!(h.variability, Variability::Continuous);
        assert_eq!(h.start, Some(Value::Real(1.0)));
        assert_eq!(h.description.as_deref(), Some("height, used as state"));

        let e = description.variable(2).unwrap();
        assert_eq!(e.name, "e");
        assert!(e.is_input());
        assert_eq!(e.variable_type.type_code(), 1);
    }

    #[test]
    fn reference_lookup_can_be_narrowed_by_type() {
        let description: ModelDescription = DESCRIPTION.parse().unwrap();
        assert_eq!(description.by_reference(0, None).unwrap().name, "h");
        assert_eq!(
            description
                .by_reference(0, Some(VariableType::Integer))
                .unwrap()
                .name,
            "counter"
        );
        assert_eq!(
            description
                .by_reference(0, Some(VariableType::Boolean))
                .unwrap()
                .start,
            Some(Value::Boolean(true))
        );
        assert!(description.by_reference(99, None).is_none());
    }

    #[test]
    fn selectors_resolve_through_catalog() {
        let description: ModelDescription = DESCRIPTION.parse().unwrap();
        let by_index = description.resolve(&VariableSelector::Index(1)).unwrap();
        let by_ref = description.resolve(&VariableSelector::Reference(1)).unwrap();
        let by_name = description
            .resolve(&VariableSelector::Name("der(h)".into()))
            .unwrap();
        assert_eq!(by_index, by_ref);
        assert_eq!(by_ref, by_name);
        assert_eq!(description.outputs().count(), 2);
        assert_eq!(description.inputs().count(), 2);
    }

    #[test]
    fn rejects_missing_guid() {
        let xml = r#"<fmiModelDescription fmiVersion="1.0" modelName="m" modelIdentifier="m"/>"#;
        let err = xml.parse::<ModelDescription>().unwrap_err();
        assert!(err.to_string().contains("guid"));
    }
}
