//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Model loader seam producing a bound function table."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::path::Path;

use tracing::{info, warn};

use crate::binding::{FmiApi, NativeBinding};
use crate::catalog::ModelDescription;
use crate::package::ModelPackage;
use crate::Result;

/// A bound model: capability table plus the package it came from.
pub struct LoadedModel {
    pub api: Box<dyn FmiApi>,
    pub package: ModelPackage,
}

impl LoadedModel {
    pub fn description(&self) -> &ModelDescription {
        self.package.description()
    }

    /// Unbind and remove unpacked files. Safe to call repeatedly.
    pub fn release(&mut self) -> Result<()> {
        self.api.unbind();
        self.package.cleanup()
    }
}

/// Turns a package path into a [`LoadedModel`].
pub trait ModelLoader {
    fn load(&self, package: &Path) -> Result<LoadedModel>;
}

/// Unpacks the archive and binds the platform shared library.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl ModelLoader for NativeLoader {
    fn load(&self, package: &Path) -> Result<LoadedModel> {
        let mut package = ModelPackage::open(package)?;
        let library = package.library_path();
        let model_identifier = package.description().model_identifier.clone();
        let binding = match NativeBinding::bind(&library, &model_identifier) {
            Ok(binding) => binding,
            Err(err) => {
                if let Err(cleanup) = package.cleanup() {
                    warn!(error = %cleanup, "failed to remove unpacked model files");
                }
                return Err(err);
            }
        };
        match (binding.version(), binding.types_platform()) {
            (Ok(version), Ok(platform)) => info!(
                model = %model_identifier,
                fmi_version = %version,
                types_platform = %platform,
                "model loaded"
            ),
            _ => warn!(model = %model_identifier, "model did not report version metadata"),
        }
        Ok(LoadedModel {
            api: Box::new(binding),
            package,
        })
    }
}
