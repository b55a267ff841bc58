// =============================================================================
// Trade Journal — append-only audit log of trade outcomes
// =============================================================================
//
// One JSON line per outcome. The file is opened in append mode per write so
// a crash can lose at most the line in flight; nothing is ever rewritten.
// =============================================================================

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::performance::TradeOutcome;

/// Append-only journal of [`TradeOutcome`] records.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append one outcome as a single JSON line.
    pub fn append(&self, outcome: &TradeOutcome) -> Result<()> {
        let line =
            serde_json::to_string(outcome).context("failed to serialise trade outcome")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open journal at {}", self.path.display()))?;

        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to journal at {}", self.path.display()))?;

        debug!(ticker = %outcome.ticker, path = %self.path.display(), "outcome journaled");
        Ok(())
    }

    /// Read back the most recent `limit` outcomes, oldest first. Unparseable
    /// lines are skipped with a warning rather than failing the read.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<TradeOutcome>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open journal at {}", self.path.display()))?;

        let mut outcomes = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("failed to read journal line")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeOutcome>(&line) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "skipping malformed journal line"),
            }
        }

        let skip = outcomes.len().saturating_sub(limit);
        Ok(outcomes.split_off(skip))
    }
}
