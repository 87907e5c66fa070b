//! ---
//! twin_section: "03-model-binding"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "FMI 1.0 co-simulation binding, catalog and package loading."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! Host side of the FMI 1.0 co-simulation interface.
//!
//! [`FmiApi`] is the capability table every model call goes through. The
//! native implementation resolves it from a shared library; test doubles
//! implement the same trait.

use std::path::PathBuf;

pub mod accessor;
pub mod binding;
pub mod catalog;
pub mod ffi;
pub mod loader;
pub mod package;
pub mod value;

/// Shared result type for binding operations.
pub type Result<T> = std::result::Result<T, FmiError>;

/// Failures while resolving the native function table.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("shared library {0} not found in package")]
    LibraryNotFound(PathBuf),
    #[error("failed to load shared library {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("missing symbol {0}")]
    MissingSymbol(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FmiError {
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("model binding has been released")]
    Unbound,
    #[error("model instantiation failed for {0}")]
    InstantiationFailed(String),
    #[error("{operation} failed for {variable} with status {status}")]
    ModelCallFailed {
        operation: &'static str,
        variable: String,
        status: Status,
    },
    #[error("variable {variable} of type {expected} cannot hold {found}")]
    TypeMismatch {
        variable: String,
        expected: VariableType,
        found: String,
    },
    #[error("invalid model description: {0}")]
    Catalog(String),
    #[error("model description is not well-formed xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("model package cannot be unpacked: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("package location {0} cannot be expressed as a file url")]
    InvalidLocation(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub use accessor::VariableAccessor;
pub use binding::{FmiApi, InstantiateRequest, ModelHandle, NativeBinding};
pub use catalog::{
    Causality, DefaultExperiment, ModelDescription, Variability, VariableDescriptor, VariableType,
};
pub use ffi::{Status, StatusKind};
pub use loader::{LoadedModel, ModelLoader, NativeLoader};
pub use package::ModelPackage;
pub use value::Value;
