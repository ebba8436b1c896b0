//! Spreadsheet store: load, resume-merge, checkpoint and highlight

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Color, Format, FormatPattern, Workbook};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{TitleRecord, FIELD_COLUMNS, TITLE_COLUMN};

/// Fill for rows that still need a manual look
const HIGHLIGHT_RGB: u32 = 0xFF9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetFormat {
    Workbook,
    Csv,
}

impl SheetFormat {
    fn of(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(SheetFormat::Csv),
            Some("xlsx" | "xlsm" | "xls" | "ods") => Ok(SheetFormat::Workbook),
            _ => bail!(
                "Unsupported spreadsheet type: {} (expected .xlsx or .csv)",
                path.display()
            ),
        }
    }
}

fn column_names() -> Vec<&'static str> {
    let mut columns = vec![TITLE_COLUMN];
    columns.extend(FIELD_COLUMNS);
    columns
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    match SheetFormat::of(path)? {
        SheetFormat::Workbook => {
            let mut workbook = open_workbook_auto(path)
                .with_context(|| format!("Failed to open workbook: {}", path.display()))?;
            let range = workbook
                .worksheet_range_at(0)
                .with_context(|| format!("Workbook has no sheets: {}", path.display()))?
                .with_context(|| format!("Failed to read first sheet: {}", path.display()))?;
            Ok(range
                .rows()
                .map(|row| row.iter().map(cell_text).collect())
                .collect())
        }
        SheetFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(path)
                .with_context(|| format!("Failed to open CSV: {}", path.display()))?;
            let mut rows = Vec::new();
            for record in reader.records() {
                let record =
                    record.with_context(|| format!("Failed to parse CSV: {}", path.display()))?;
                rows.push(record.iter().map(|c| c.trim().to_string()).collect());
            }
            Ok(rows)
        }
    }
}

/// Turn raw rows (header first) into title records.
///
/// The title column is the one named "title", else the first column whatever
/// its header says. Output columns are picked up by name; anything else is
/// dropped. Blank titles are skipped and repeated titles keep their first row.
pub fn records_from_rows(rows: Vec<Vec<String>>) -> Vec<TitleRecord> {
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };

    let find = |name: &str| header.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let title_idx = find(TITLE_COLUMN).unwrap_or(0);
    if header.get(title_idx).map_or(true, |h| !h.trim().eq_ignore_ascii_case(TITLE_COLUMN)) {
        log::debug!(
            "Using first column ('{}') as the title column",
            header.first().map(String::as_str).unwrap_or("")
        );
    }
    let field_idx: Vec<(&str, usize)> = FIELD_COLUMNS
        .iter()
        .filter_map(|name| Some((*name, find(*name)?)))
        .collect();

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for row in rows {
        let title = row.get(title_idx).map(|t| t.trim()).unwrap_or("");
        if title.is_empty() {
            continue;
        }
        if !seen.insert(title.to_string()) {
            log::warn!("Duplicate title '{}' ignored", title);
            continue;
        }

        let mut record = TitleRecord::new(title);
        for (name, idx) in &field_idx {
            if let (Some(value), Some(field)) = (row.get(*idx), record.field_mut(name)) {
                *field = value.trim().to_string();
            }
        }
        records.push(record);
    }
    records
}

/// Load a sheet as title records
pub fn load_table(path: &Path) -> Result<Vec<TitleRecord>> {
    Ok(records_from_rows(read_rows(path)?))
}

/// Overlay previously saved rows onto freshly loaded input, keyed by title.
///
/// Base order is kept. Non-empty override fields win. Override rows with no
/// matching input title are appended so earlier results are never lost.
pub fn merge(base: Vec<TitleRecord>, overrides: Vec<TitleRecord>) -> Vec<TitleRecord> {
    let mut by_title: HashMap<String, TitleRecord> = overrides
        .iter()
        .map(|r| (r.title.clone(), r.clone()))
        .collect();

    let mut merged: Vec<TitleRecord> = base
        .into_iter()
        .map(|mut record| {
            if let Some(saved) = by_title.remove(&record.title) {
                for name in FIELD_COLUMNS {
                    let value = saved.field(name).unwrap_or("");
                    if value.trim().is_empty() {
                        continue;
                    }
                    if let Some(field) = record.field_mut(name) {
                        *field = value.to_string();
                    }
                }
            }
            record
        })
        .collect();

    // Preserve the override file's order for the leftovers
    for record in overrides {
        if let Some(extra) = by_title.remove(&record.title) {
            merged.push(extra);
        }
    }
    merged
}

/// Indices of rows whose link is empty or "Unknown", in sheet order
pub fn pending(records: &[TitleRecord]) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.needs_resolution())
        .map(|(i, _)| i)
        .collect()
}

/// Load the input and overlay any partial output from an earlier run
pub fn open_with_resume(input: &Path, output: &Path) -> Result<Vec<TitleRecord>> {
    if !input.exists() {
        bail!("Input file not found: {}", input.display());
    }
    let base = load_table(input)?;

    if !output.exists() {
        return Ok(base);
    }
    let saved = load_table(output)
        .with_context(|| format!("Failed to resume from {}", output.display()))?;
    log::info!(
        "Resuming from {} ({} saved rows)",
        output.display(),
        saved.len()
    );
    Ok(merge(base, saved))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn write_workbook(path: &Path, records: &[TitleRecord], highlight: bool) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let header_format = Format::new().set_bold();
    let fill = Format::new()
        .set_background_color(Color::RGB(HIGHLIGHT_RGB))
        .set_pattern(FormatPattern::Solid);

    for (col, name) in column_names().into_iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, &header_format)?;
    }

    for (i, record) in records.iter().enumerate() {
        let row = (i + 1) as u32;
        let filled = highlight && record.needs_resolution();
        for (col, value) in record.cells().into_iter().enumerate() {
            let col = col as u16;
            match (filled, value.is_empty()) {
                (true, true) => worksheet.write_blank(row, col, &fill)?,
                (true, false) => worksheet.write_string_with_format(row, col, value, &fill)?,
                (false, true) => continue,
                (false, false) => worksheet.write_string(row, col, value)?,
            };
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write workbook: {}", path.display()))?;
    Ok(())
}

fn write_csv(path: &Path, records: &[TitleRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV: {}", path.display()))?;
    writer.write_record(column_names())?;
    for record in records {
        writer.write_record(record.cells())?;
    }
    writer.flush()?;
    Ok(())
}

/// Persist the whole table, replacing `path` only once the new file is complete
pub fn save_table(path: &Path, records: &[TitleRecord], highlight: bool) -> Result<()> {
    let format = SheetFormat::of(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    match format {
        SheetFormat::Workbook => write_workbook(&tmp, records, highlight)?,
        SheetFormat::Csv => write_csv(&tmp, records)?,
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Re-open a saved sheet and fill every row whose link is missing.
///
/// Returns the number of highlighted rows. CSV has no styling, so CSV files are
/// left alone.
pub fn highlight_unresolved(path: &Path) -> Result<usize> {
    if SheetFormat::of(path)? == SheetFormat::Csv {
        log::warn!("{} is CSV; cell highlighting is not supported", path.display());
        return Ok(0);
    }
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }

    let records = load_table(path)?;
    save_table(path, &records, true)?;
    Ok(pending(&records).len())
}
