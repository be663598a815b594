//! TSV report writers
//!
//! Both reports start with a header row. Values never contain a tab or a
//! line break; those are written as spaces. Multi-collection cells are
//! joined with `|`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{RefscanError, Result};
use crate::references::{ReferenceMap, ReferenceRecord};
use crate::scan::ViolationRecord;

pub const LIST_SEPARATOR: &str = "|";

const REFERENCE_COLUMNS: [&str; 3] = ["source_collection", "field", "target_collections"];

const VIOLATION_COLUMNS: [&str; 6] = [
    "source_collection",
    "source_document_id",
    "field",
    "referenced_id",
    "target_collections_searched",
    "found_in_collection",
];

/// Write the reference report straight from the schema's reference map
///
/// Needs no database; this is all a `--no-scan` run produces.
pub fn write_reference_map(path: &Path, map: &ReferenceMap) -> Result<usize> {
    let rows = write_references(path, &map.reference_records())?;
    tracing::info!(path = %path.display(), rows, "Reference report written");
    Ok(rows)
}

/// Write reference rows, sorted
pub fn write_references(path: &Path, references: &[ReferenceRecord]) -> Result<usize> {
    let mut rows: Vec<&ReferenceRecord> = references.iter().collect();
    rows.sort();
    rows.dedup();

    write_tsv(path, &REFERENCE_COLUMNS, |out| {
        for record in &rows {
            write_row(
                out,
                &[
                    record.source_collection.as_str(),
                    record.field.as_str(),
                    &record.target_collections.join(LIST_SEPARATOR),
                ],
            )?;
        }
        Ok(rows.len())
    })
}

/// Write violation rows, sorted
///
/// The `found_in_collection` column is only written when the locator ran.
pub fn write_violations(path: &Path, violations: &[ViolationRecord], include_found_column: bool) -> Result<usize> {
    let mut rows: Vec<&ViolationRecord> = violations.iter().collect();
    rows.sort();

    let columns = if include_found_column {
        &VIOLATION_COLUMNS[..]
    } else {
        &VIOLATION_COLUMNS[..VIOLATION_COLUMNS.len() - 1]
    };

    write_tsv(path, columns, |out| {
        for violation in &rows {
            let searched = violation.searched_collections.join(LIST_SEPARATOR);
            let mut cells = vec![
                violation.source_collection.as_str(),
                violation.source_id.as_deref().unwrap_or(""),
                violation.field.as_str(),
                violation.referenced_id.as_str(),
                searched.as_str(),
            ];
            if include_found_column {
                cells.push(violation.found_in_collection.as_deref().unwrap_or(""));
            }
            write_row(out, &cells)?;
        }
        Ok(rows.len())
    })
}

fn write_tsv(
    path: &Path,
    columns: &[&str],
    body: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<usize>,
) -> Result<usize> {
    let failed = |e: std::io::Error| RefscanError::ReportWrite {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let file = File::create(path).map_err(failed)?;
    let mut out = BufWriter::new(file);
    write_row(&mut out, columns).map_err(failed)?;
    let rows = body(&mut out).map_err(failed)?;
    out.flush().map_err(failed)?;

    tracing::info!(path = %path.display(), rows, "Wrote report");
    Ok(rows)
}

fn write_row(out: &mut impl Write, cells: &[&str]) -> std::io::Result<()> {
    let line: Vec<String> = cells.iter().map(|cell| sanitize(cell)).collect();
    writeln!(out, "{}", line.join("\t"))
}

fn sanitize(cell: &str) -> String {
    cell.replace(['\t', '\n', '\r'], " ")
}
