//! ---
//! twin_section: "05-persistence"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Run counter and result file persistence."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! File-backed state that outlives a single run.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The counter file exists but does not hold an unsigned integer.
    #[error("run counter {path} holds {content:?}, expected an unsigned integer")]
    CorruptCounter {
        /// Counter file.
        path: String,
        /// Offending content.
        content: String,
    },
    /// Wrapper for delimited-file write failures.
    #[error("result file error: {0}")]
    Csv(#[from] csv::Error),
    /// Result row does not match the header.
    #[error("result row has {found} values, header has {expected}")]
    RowWidth {
        /// Columns after `time` in the header.
        expected: usize,
        /// Values supplied.
        found: usize,
    },
}

pub mod results;
pub mod run_counter;

pub use results::ResultWriter;
pub use run_counter::RunCounter;
