//! PDF table extraction and spreadsheet generation.
//!
//! ```text
//! PDF bytes ──extract──▶ Vec<ExtractedTable> ──write_workbook──▶ .xlsx bytes
//! ```
//!
//! 1. [`extract`]: pdfium text segments → [`layout::TextBox`]es
//! 2. [`layout`] : whitespace/alignment ("stream") table detection
//! 3. [`xlsx`]   : one worksheet per table
//!
//! The HTTP boundary only depends on the [`TableExtractor`] trait.

pub mod extract;
pub mod layout;
pub mod xlsx;

pub use extract::PdfiumTableExtractor;
pub use xlsx::write_workbook;

use crate::error::TableError;
use serde::{Deserialize, Serialize};

/// One table found on one page.
///
/// `data` is rectangular: every row has `columns` cells, absent cells are
/// empty strings and every cell is trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// 1-based.
    pub page_number: usize,
    /// 1-based, restarting on every page.
    pub table_number: usize,
    pub data: Vec<Vec<String>>,
    pub rows: usize,
    pub columns: usize,
}

impl ExtractedTable {
    /// Clean a raw grid and wrap it. Returns `None` when nothing is left.
    ///
    /// Rows whose cells are all blank are dropped, cells are trimmed and
    /// short rows are padded to the widest row.
    pub fn from_grid(
        page_number: usize,
        table_number: usize,
        grid: Vec<Vec<String>>,
    ) -> Option<Self> {
        let mut data: Vec<Vec<String>> = grid
            .into_iter()
            .map(|row| row.into_iter().map(|c| c.trim().to_string()).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|c| !c.is_empty()))
            .collect();
        let columns = data.iter().map(Vec::len).max().unwrap_or(0);
        if data.is_empty() || columns == 0 {
            return None;
        }
        for row in &mut data {
            row.resize(columns, String::new());
        }
        Some(Self {
            page_number,
            table_number,
            rows: data.len(),
            columns,
            data,
        })
    }
}

/// Finds tables in a PDF document.
///
/// Implementations are synchronous and CPU-bound; async callers should run
/// them on a blocking thread.
pub trait TableExtractor: Send + Sync {
    fn extract(&self, pdf: &[u8]) -> Result<Vec<ExtractedTable>, TableError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn from_grid_cleans_and_pads() {
        let t = ExtractedTable::from_grid(
            2,
            1,
            grid(&[&[" Name ", "Qty"], &["", "  "], &["Widget", "3", "extra"], &["Bolt"]]),
        )
        .unwrap();
        assert_eq!(t.rows, 3);
        assert_eq!(t.columns, 3);
        assert_eq!(t.data[0], vec!["Name", "Qty", ""]);
        assert_eq!(t.data[2], vec!["Bolt", "", ""]);
    }

    #[test]
    fn from_grid_rejects_blank_tables() {
        assert!(ExtractedTable::from_grid(1, 1, grid(&[&["", " "]])).is_none());
        assert!(ExtractedTable::from_grid(1, 1, vec![]).is_none());
    }

    #[test]
    fn serializes_with_expected_keys() {
        let t = ExtractedTable::from_grid(1, 2, grid(&[&["a", "b"]])).unwrap();
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["page_number"], 1);
        assert_eq!(v["table_number"], 2);
        assert_eq!(v["rows"], 1);
        assert_eq!(v["columns"], 2);
        assert_eq!(v["data"][0][1], "b");
    }
}
