//! ---
//! twin_section: "08-cli"
//! twin_subsection: "binary"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "The inspect subcommand: catalog listing without binding the model."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use twin_core::VariableInfo;
use twin_fmi::ModelPackage;

#[derive(Debug, Args)]
pub struct InspectArgs {
    #[arg(value_name = "FMU", help = "Model package (.fmu archive or unpacked directory)")]
    pub package: PathBuf,

    #[arg(long, help = "One JSON object per variable")]
    pub json: bool,
}

pub fn execute(args: InspectArgs) -> Result<()> {
    let mut package = ModelPackage::open(&args.package)
        .with_context(|| format!("unable to open model package {}", args.package.display()))?;
    let description = package.description();
    if args.json {
        for variable in description.variables() {
            println!("{}", serde_json::to_string(&VariableInfo::from(variable))?);
        }
    } else {
        println!(
            "{} ({}) fmi {} guid {}",
            description.model_name,
            description.model_identifier,
            description.fmi_version,
            description.guid
        );
        println!(
            "{:>5}  {:<32} {:<20} {:>9} {:>4}  start",
            "index", "name", "causality", "reference", "type"
        );
        for variable in description.variables() {
            let info = VariableInfo::from(variable);
            let start = info
                .start
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_owned());
            println!(
                "{:>5}  {:<32} {:<20} {:>9} {:>4}  {}",
                info.index, info.name, info.causality, info.reference, info.type_code, start
            );
        }
    }
    package.cleanup()?;
    Ok(())
}
