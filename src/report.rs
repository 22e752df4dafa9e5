//! Spreadsheet export of the processing history.

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook};
use std::path::{Path, PathBuf};

use crate::history::{HistoryRecord, HistoryStore};

const SHEET_NAME: &str = "History";

/// A cell in the exported table.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

/// Header plus one row per history record, in append order.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportTable {
    pub header: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

impl ReportTable {
    pub fn from_records(records: &[HistoryRecord]) -> Self {
        let rows = records
            .iter()
            .map(|record| {
                vec![
                    Cell::Text(record.id.clone()),
                    Cell::Text(record.timestamp.clone()),
                    Cell::Text(record.source_label.clone()),
                    Cell::Number(f64::from(record.truck_count)),
                    Cell::Text(record.output_path.clone()),
                ]
            })
            .collect();
        Self {
            header: HistoryRecord::FIELDS.to_vec(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table as a single-sheet workbook, replacing any existing file.
    pub fn write_xlsx(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;

        for (col, name) in self.header.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *name, &header_format)?;
        }
        for (row_idx, row) in self.rows.iter().enumerate() {
            let row_num = row_idx as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                match cell {
                    Cell::Text(value) => sheet.write_string(row_num, col as u16, value)?,
                    Cell::Number(value) => sheet.write_number(row_num, col as u16, *value)?,
                };
            }
        }

        workbook
            .save(path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        Ok(())
    }
}

/// Build the report from every stored record.
///
/// Returns `Ok(None)` when the history is empty; nothing is written then.
pub fn generate(store: &mut dyn HistoryStore, report_path: &Path) -> Result<Option<PathBuf>> {
    let records = store.read_all()?;
    let table = ReportTable::from_records(&records);
    if table.is_empty() {
        log::debug!("report skipped: history is empty");
        return Ok(None);
    }
    table.write_xlsx(report_path)?;
    log::info!(
        "report written to {} ({} rows)",
        report_path.display(),
        table.rows.len()
    );
    Ok(Some(report_path.to_path_buf()))
}
