//! Per-node output record streams.
//!
//! Each catchment and nexus gets one append stream, truncated when the run
//! starts and never reopened mid-run. One `<timestep>, <value>` record is
//! written per timestep.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;

use crate::errors::{HydronetError, HydronetResult};
use crate::nexus::TimeStep;

/// The record stream for one node.
#[derive(Debug)]
pub struct OutputWriter {
    writer: BufWriter<File>,
}

impl OutputWriter {
    /// Open the stream, truncating any previous run's records.
    pub fn create(path: impl AsRef<Path>) -> HydronetResult<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn write_record(&mut self, timestep: TimeStep, value: f64) -> HydronetResult<()> {
        writeln!(self.writer, "{}, {}", timestep, value)?;
        Ok(())
    }

    pub fn flush(&mut self) -> HydronetResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// The per-node writers for one run, keyed by node id.
#[derive(Debug, Default)]
pub struct OutputSet {
    writers: IndexMap<String, OutputWriter>,
}

impl OutputSet {
    /// Create one truncated stream per node id under `directory`, named
    /// `<id>_output.csv`.
    pub fn create(
        directory: impl AsRef<Path>,
        node_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> HydronetResult<Self> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;

        let mut writers = IndexMap::new();
        for id in node_ids {
            let id = id.into();
            let path = directory.join(format!("{id}_output.csv"));
            writers.insert(id, OutputWriter::create(path)?);
        }
        Ok(Self { writers })
    }

    pub fn write_record(
        &mut self,
        id: &str,
        timestep: TimeStep,
        value: f64,
    ) -> HydronetResult<()> {
        match self.writers.get_mut(id) {
            Some(writer) => writer.write_record(timestep, value),
            None => Err(HydronetError::LookupError { id: id.to_string() }),
        }
    }

    pub fn flush_all(&mut self) -> HydronetResult<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
