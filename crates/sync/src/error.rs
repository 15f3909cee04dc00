use std::fmt;

use arbor_core::ModelError;
use thiserror::Error;

/// Errors raised by distributed operations.
///
/// Every collective either succeeds on all ranks or fails on all ranks; a
/// rank that fails locally sends an abort so its peers fail with
/// [`SyncError::Aborted`] instead of waiting forever.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("rank {rank} is no longer reachable")]
    Disconnected { rank: usize },

    #[error("rank {rank} aborted the operation: {reason}")]
    Aborted { rank: usize, reason: String },

    #[error("cannot encode message: {reason}")]
    Encode { reason: String },

    #[error("cannot decode message")]
    Decode(#[from] serde_json::Error),

    /// The coordinator could not transmit the tree; `failures` lists the
    /// nodes that do not serialize on their own.
    #[error("cannot transmit the model: {reason} ({} nodes fail to serialize)", failures.len())]
    Serialization { reason: String, failures: Vec<String> },

    #[error("the coordinator has no root to distribute")]
    NoRoot,

    #[error("scatter needs {expected} values but was given {found}")]
    ScatterLength { expected: usize, found: usize },

    #[error("ranks hold trees of different sizes: {sizes:?}")]
    ShapeMismatch { sizes: Vec<usize> },

    #[error("{0}")]
    Conflicts(ConflictReport),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One parameter written to different values on different ranks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConflictEntry {
    pub composite: String,
    pub composite_type: String,
    pub parent: String,
    pub parameter: String,
    pub ranks: Vec<usize>,
}

/// Every conflict found while synchronizing, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub entries: Vec<ConflictEntry>,
}

impl ConflictReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const HEADERS: [&str; 5] = [
            "Composite",
            "Composite Type",
            "Composite Parent",
            "ParameterName",
            "NodeRanks",
        ];

        let rows: Vec<[String; 5]> = self
            .entries
            .iter()
            .map(|entry| {
                [
                    entry.composite.clone(),
                    entry.composite_type.clone(),
                    entry.parent.clone(),
                    entry.parameter.clone(),
                    format!("{:?}", entry.ranks),
                ]
            })
            .collect();
        let mut widths = HEADERS.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        writeln!(f, "synchronization failed due to overlapping data")?;
        write_row(f, &HEADERS, &widths)?;
        let rule = widths.map(|width| "-".repeat(width));
        write_row(f, &rule.each_ref().map(String::as_str), &widths)?;
        for row in &rows {
            write_row(f, &row.each_ref().map(String::as_str), &widths)?;
        }
        Ok(())
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, cells: &[&str; 5], widths: &[usize; 5]) -> fmt::Result {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    writeln!(f, "{}", padded.join("  ").trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_one_row_per_conflict() {
        let report = ConflictReport {
            entries: vec![ConflictEntry {
                composite: "<Assembly A1 #3>".into(),
                composite_type: "Assembly".into(),
                parent: "<Core core #0>".into(),
                parameter: "power".into(),
                ranks: vec![0, 2],
            }],
        };
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("Composite"));
        assert!(lines[3].contains("power"));
        assert!(lines[3].ends_with("[0, 2]"));
    }
}
