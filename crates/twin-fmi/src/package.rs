//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Model package unpacking and shared library resolution."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fs::File;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};
use url::Url;

use crate::catalog::{ModelDescription, MODEL_DESCRIPTION_FILE};
use crate::{FmiError, Result};

/// Platform directory below `binaries/` for the running host.
pub fn platform_directory() -> &'static str {
    if cfg!(target_os = "windows") {
        if cfg!(target_pointer_width = "64") {
            "win64"
        } else {
            "win32"
        }
    } else if cfg!(target_os = "macos") {
        if cfg!(target_pointer_width = "64") {
            "darwin64"
        } else {
            "darwin32"
        }
    } else if cfg!(target_pointer_width = "64") {
        "linux64"
    } else {
        "linux32"
    }
}

/// An unpacked model: archive source, extraction root and parsed description.
///
/// Archives are extracted into a private temporary directory that is removed
/// by [`ModelPackage::cleanup`] or on drop. Directory packages are used in
/// place and never deleted.
#[derive(Debug)]
pub struct ModelPackage {
    source: PathBuf,
    root: PathBuf,
    extracted: Option<TempDir>,
    description: ModelDescription,
}

impl ModelPackage {
    pub fn open(source: &Path) -> Result<Self> {
        let (root, extracted) = if source.is_dir() {
            (source.to_path_buf(), None)
        } else {
            let directory = tempfile::Builder::new().prefix("twin-fmu-").tempdir()?;
            let archive = File::open(source)?;
            let mut archive = zip::ZipArchive::new(archive)?;
            archive.extract(directory.path())?;
            info!(
                package = %source.display(),
                destination = %directory.path().display(),
                entries = archive.len(),
                "unpacked model package"
            );
            (directory.path().to_path_buf(), Some(directory))
        };
        let description = ModelDescription::from_file(&root.join(MODEL_DESCRIPTION_FILE))?;
        Ok(Self {
            source: source.to_path_buf(),
            root,
            extracted,
            description,
        })
    }

    /// Package whose files are managed elsewhere, e.g. by a test double.
    pub fn from_parts(source: PathBuf, root: PathBuf, description: ModelDescription) -> Self {
        Self {
            source,
            root,
            extracted: None,
            description,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn description(&self) -> &ModelDescription {
        &self.description
    }

    /// Last component of the package path, extension included.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.description.model_identifier.clone())
    }

    pub fn library_path(&self) -> PathBuf {
        self.root
            .join("binaries")
            .join(platform_directory())
            .join(format!(
                "{}.{}",
                self.description.model_identifier,
                std::env::consts::DLL_EXTENSION
            ))
    }

    /// `file://` URL of the extraction root, handed to the model at instantiate.
    pub fn location_url(&self) -> Result<String> {
        let absolute = if self.root.is_absolute() {
            self.root.clone()
        } else {
            std::env::current_dir()?.join(&self.root)
        };
        Url::from_directory_path(&absolute)
            .map(String::from)
            .map_err(|_| FmiError::InvalidLocation(absolute))
    }

    /// Remove extracted files. Idempotent.
    pub fn cleanup(&mut self) -> Result<()> {
        if let Some(directory) = self.extracted.take() {
            let path = directory.path().to_path_buf();
            directory.close()?;
            debug!(path = %path.display(), "removed unpacked model files");
        }
        Ok(())
    }

    pub fn is_extracted(&self) -> bool {
        self.extracted.is_some()
    }
}

impl Drop for ModelPackage {
    fn drop(&mut self) {
        if let Err(err) = self.cleanup() {
            warn!(error = %err, package = %self.source.display(), "failed to remove unpacked model files");
        }
    }
}
