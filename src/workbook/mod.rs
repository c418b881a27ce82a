//! Spreadsheet Normalizer
//!
//! Rewrites recognized Avis report sheets so each carries a frozen header
//! pane and a named table over its used range. Sheets with unrecognized
//! names are logged and left untouched; the rest of the workbook survives
//! byte-for-byte.

pub mod inspect;
pub mod layout;
pub mod patch;

use crate::utils::error::AppResult;
use inspect::Inspector;
use layout::{CellRef, layout_for, table_name_for};
use patch::{SheetPatch, TableSpec};
use tracing::error;

/// Apply the per-sheet-name layout rules to the workbook in `bytes` and
/// return the re-serialized package.
///
/// Errors here mean the workbook could not be processed at all; the caller
/// falls back to copying the original bytes unmodified.
pub fn normalize_workbook(bytes: &[u8]) -> AppResult<Vec<u8>> {
    let mut inspector = Inspector::open(bytes)?;
    let mut patches = Vec::new();

    for sheet_name in inspector.sheet_names() {
        let Some(sheet_layout) = layout_for(&sheet_name) else {
            error!("unknown sheet name '{}': can't process", sheet_name);
            continue;
        };

        let profile = inspector.sheet_profile(&sheet_name, sheet_layout.anchor)?;
        let bottom_right = CellRef::new(profile.last_row, profile.last_col);
        let table = TableSpec {
            name: table_name_for(&sheet_name),
            ref_range: format!("{}:{}", sheet_layout.anchor.a1(), bottom_right.a1()),
            columns: profile.headers,
        };

        patches.push(SheetPatch {
            sheet_name,
            freeze: sheet_layout.freeze,
            table,
        });
    }

    patch::apply_patches(bytes, &patches)
}
