// Flat results report: every finalized selection, then whoever is left over.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use super::state::{AppState, ClassLabel};

/// Team column value for candidates nobody picked.
pub const UNASSIGNED: &str = "Unassigned";

/// One row of the results export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    #[serde(rename = "Candidate")]
    pub candidate: String,
    #[serde(rename = "Class")]
    pub class_label: ClassLabel,
    #[serde(rename = "Team")]
    pub team: String,
}

/// Selections in the order they were made, followed by unassigned
/// candidates in insertion order.
pub fn project_results(state: &AppState) -> Vec<ResultRow> {
    let selected = state.auction.selections.iter().map(|s| ResultRow {
        candidate: s.candidate.clone(),
        class_label: s.class_label,
        team: s.team.clone(),
    });
    let leftover = state.unassigned().map(|c| ResultRow {
        candidate: c.name.clone(),
        class_label: c.class_label,
        team: UNASSIGNED.to_string(),
    });
    selected.chain(leftover).collect()
}

/// Whether there is anything worth exporting.
pub fn has_results(state: &AppState) -> bool {
    !state.auction.selections.is_empty() || state.unassigned().next().is_some()
}

/// Write `rows` as CSV with a `Candidate,Class,Team` header.
pub fn write_rows<W: Write>(wtr: W, rows: &[ResultRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(wtr);
    if rows.is_empty() {
        writer
            .write_record(["Candidate", "Class", "Team"])
            .context("failed to write results header")?;
    }
    for row in rows {
        writer.serialize(row).context("failed to write results row")?;
    }
    writer.flush().context("failed to flush results")?;
    Ok(())
}

/// Render the results report to a CSV string.
pub fn to_csv(state: &AppState) -> Result<String> {
    let mut buf = Vec::new();
    write_rows(&mut buf, &project_results(state))?;
    String::from_utf8(buf).context("results export is not valid UTF-8")
}

/// Write the results report to `path`, returning the number of rows written.
pub fn write_csv(state: &AppState, path: &Path) -> Result<usize> {
    let rows = project_results(state);
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_rows(file, &rows)?;
    Ok(rows.len())
}
