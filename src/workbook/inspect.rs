//! Read-side view of a workbook: sheet names, used-range extents and header
//! row values, via calamine.

use super::layout::CellRef;
use crate::utils::error::{AppError, AppResult};
use calamine::{Reader, Xlsx};
use std::collections::HashSet;
use std::io::Cursor;

/// Extent and header names for one sheet, relative to a table anchor.
#[derive(Debug, Clone)]
pub struct SheetProfile {
    /// Last populated row, 1-based, clamped to the anchor row.
    pub last_row: u32,
    /// Last populated column, 1-based, clamped to the anchor column.
    pub last_col: u32,
    /// Column names for the table region, read from the anchor row.
    pub headers: Vec<String>,
}

pub struct Inspector {
    workbook: Xlsx<Cursor<Vec<u8>>>,
}

impl Inspector {
    pub fn open(bytes: &[u8]) -> AppResult<Self> {
        let workbook = Xlsx::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| AppError::Workbook(format!("Failed to open workbook: {}", e)))?;
        Ok(Self { workbook })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names().to_vec()
    }

    /// Profile `sheet` for a table anchored at `anchor`.
    ///
    /// The bottom-right corner is the sheet's last populated row/column, never
    /// above or left of the anchor itself, so the resulting range is always a
    /// valid rectangle. Header cells that are blank or duplicated fall back to
    /// positional `ColumnN` names.
    pub fn sheet_profile(&mut self, sheet: &str, anchor: CellRef) -> AppResult<SheetProfile> {
        let range = self
            .workbook
            .worksheet_range(sheet)
            .map_err(|e| AppError::Workbook(format!("Failed to read sheet '{}': {}", sheet, e)))?;

        let (last_row, last_col) = match range.end() {
            Some((row, col)) => (row + 1, col + 1),
            None => (0, 0),
        };
        let last_row = last_row.max(anchor.row);
        let last_col = last_col.max(anchor.col);

        let mut headers = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (position, col) in (anchor.col..=last_col).enumerate() {
            let raw = range
                .get_value((anchor.row - 1, col - 1))
                .map(|value| value.to_string())
                .unwrap_or_default();
            let trimmed = raw.trim();

            let base = if trimmed.is_empty() {
                format!("Column{}", position + 1)
            } else {
                trimmed.to_string()
            };

            let mut name = base.clone();
            let mut suffix = 2;
            while seen.contains(&name) {
                name = format!("{}{}", base, suffix);
                suffix += 1;
            }
            seen.insert(name.clone());
            headers.push(name);
        }

        Ok(SheetProfile {
            last_row,
            last_col,
            headers,
        })
    }
}
