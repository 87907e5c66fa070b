//! ---
//! twin_section: "07-testing"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Model loader handing out a prepared fake slave."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::path::Path;

use parking_lot::Mutex;
use twin_fmi::{
    FmiError, LoadedModel, ModelDescription, ModelLoader, ModelPackage, Result as FmiResult,
};

use crate::slave::{linear_model_description, FakeSlave, SlaveProbe};

/// [`ModelLoader`] that returns a single prepared [`FakeSlave`].
///
/// The package root is the system temp directory so the location URL is a
/// valid absolute `file://` URL. A second `load` fails.
pub struct StubLoader {
    slave: Mutex<Option<FakeSlave>>,
    description: ModelDescription,
    probe: SlaveProbe,
}

impl StubLoader {
    pub fn new(slave: FakeSlave, description: ModelDescription) -> Self {
        let probe = slave.probe();
        Self {
            slave: Mutex::new(Some(slave)),
            description,
            probe,
        }
    }

    /// Loader for [`FakeSlave::linear`].
    pub fn linear() -> Self {
        Self::new(FakeSlave::linear(), linear_model_description())
    }

    pub fn probe(&self) -> SlaveProbe {
        self.probe.clone()
    }
}

impl ModelLoader for StubLoader {
    fn load(&self, package: &Path) -> FmiResult<LoadedModel> {
        let slave = self.slave.lock().take().ok_or_else(|| {
            FmiError::Catalog(format!("{} was already loaded", package.display()))
        })?;
        Ok(LoadedModel {
            api: Box::new(slave),
            package: ModelPackage::from_parts(
                package.to_path_buf(),
                std::env::temp_dir(),
                self.description.clone(),
            ),
        })
    }
}
