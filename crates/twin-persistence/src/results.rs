//! ---
//! twin_section: "05-persistence"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Delimited result file writer."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};
use tracing::{debug, info};

use crate::{PersistenceError, Result};

/// Header `time,<columns...>` followed by one row per recorded instant.
pub struct ResultWriter {
    path: PathBuf,
    writer: Writer<File>,
    columns: usize,
    rows: u64,
}

impl ResultWriter {
    /// Create (truncate) `path` and write the header row.
    ///
    /// `separator` must be a single-byte character; the run configuration
    /// validates this before a writer is created.
    pub fn create(path: &Path, separator: char, columns: &[String]) -> Result<Self> {
        let delimiter = u8::try_from(separator).unwrap_or(b',');
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(path)?;
        writer.write_field("time")?;
        for column in columns {
            writer.write_field(column)?;
        }
        writer.write_record(None::<&[u8]>)?;
        info!(path = %path.display(), columns = columns.len(), "result file opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            columns: columns.len(),
            rows: 0,
        })
    }

    /// Append the values recorded at `time`.
    pub fn write_row(&mut self, time: f64, values: &[f64]) -> Result<()> {
        if values.len() != self.columns {
            return Err(PersistenceError::RowWidth {
                expected: self.columns,
                found: values.len(),
            });
        }
        self.writer.write_field(time.to_string())?;
        for value in values {
            self.writer.write_field(value.to_string())?;
        }
        self.writer.write_record(None::<&[u8]>)?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written after the header.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush buffered rows to disk.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        debug!(path = %self.path.display(), rows = self.rows, "result file closed");
        Ok(())
    }
}
