//! Write extracted tables into an in-memory `.xlsx` workbook.

use crate::error::TableError;
use crate::tables::ExtractedTable;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

/// Sheet name for the 1-based table index.
pub fn sheet_name(index: usize) -> String {
    format!("Table_{index}")
}

/// Whether row 0 is written as a bold header: only when there is a second
/// row and the two differ.
pub fn has_header_row(data: &[Vec<String>]) -> bool {
    data.len() > 1 && data[0] != data[1]
}

/// One worksheet per table, in order, named `Table_1`, `Table_2`, …
///
/// Empty cells are left blank rather than written as empty strings.
pub fn write_workbook(tables: &[ExtractedTable]) -> Result<Vec<u8>, TableError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    for (i, table) in tables.iter().enumerate() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(sheet_name(i + 1))?;
        write_table(sheet, table, &header)?;
    }

    Ok(workbook.save_to_buffer()?)
}

fn write_table(sheet: &mut Worksheet, table: &ExtractedTable, header: &Format) -> Result<(), TableError> {
    let promote = has_header_row(&table.data);
    for (r, row) in table.data.iter().enumerate() {
        let row_num = r as u32;
        for (c, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let col_num = c as u16;
            if promote && r == 0 {
                sheet.write_string_with_format(row_num, col_num, cell, header)?;
            } else {
                sheet.write_string(row_num, col_num, cell)?;
            }
        }
    }
    sheet.autofit();
    Ok(())
}
