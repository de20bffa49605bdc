use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Append-only per-process log. The scheduler opens one per timeslice and
/// drops it when the slice ends; every executed opcode writes one line:
///
/// ```text
/// (08/02/2026 09:15:30 AM) Core:0 "v=42"
/// ```
pub struct ProcessLog {
    out: Option<BufWriter<std::fs::File>>,
}

impl ProcessLog {
    pub fn open(dir: &Path, process_name: &str) -> Result<Self> {
        let path = dir.join(format!("{process_name}.txt"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening process log {}", path.display()))?;
        Ok(Self {
            out: Some(BufWriter::new(file)),
        })
    }

    /// A log that swallows everything; used when the real file cannot be
    /// opened so execution still proceeds.
    pub fn sink() -> Self {
        Self { out: None }
    }

    pub fn line(&mut self, core: usize, payload: &str) {
        let Some(out) = &mut self.out else { return };
        let stamp = Local::now().format("%m/%d/%Y %I:%M:%S %p");
        if let Err(e) = writeln!(out, "({stamp}) Core:{core} {payload}") {
            log::error!("process log write failed: {e}");
        }
    }
}
