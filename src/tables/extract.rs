//! pdfium-backed [`TableExtractor`].
//!
//! pdfium is bound on every call and never shared between threads, which is
//! what the library expects. Callers on an async runtime should run
//! [`PdfiumTableExtractor::extract`] inside `spawn_blocking`.

use crate::error::TableError;
use crate::tables::layout::{detect_tables, LayoutOptions, TextBox};
use crate::tables::{ExtractedTable, TableExtractor};
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable naming the directory that holds the pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Stream-table extraction over pdfium text segments.
#[derive(Debug, Clone, Default)]
pub struct PdfiumTableExtractor {
    /// Directory containing the platform pdfium library; `None` binds to
    /// the system library.
    lib_dir: Option<PathBuf>,
    options: LayoutOptions,
}

impl PdfiumTableExtractor {
    pub fn new(lib_dir: Option<PathBuf>, options: LayoutOptions) -> Self {
        Self { lib_dir, options }
    }

    /// Library directory from `$PDFIUM_LIB_PATH`, default layout options.
    pub fn from_env() -> Self {
        let lib_dir = std::env::var_os(PDFIUM_LIB_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::new(lib_dir, LayoutOptions::default())
    }

    /// Bind once and drop, to surface a missing library at startup.
    pub fn check_binding(&self) -> Result<(), TableError> {
        self.bind().map(drop)
    }

    fn bind(&self) -> Result<Pdfium, TableError> {
        let bindings = match &self.lib_dir {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| TableError::PdfiumBindingFailed(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

impl TableExtractor for PdfiumTableExtractor {
    fn extract(&self, pdf: &[u8]) -> Result<Vec<ExtractedTable>, TableError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| TableError::InvalidPdf(format!("{e:?}")))?;

        let mut tables = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let page_number = idx + 1;
            let text = page.text().map_err(|e| TableError::PageText {
                page: page_number,
                detail: format!("{e:?}"),
            })?;
            let boxes: Vec<TextBox> = text
                .segments()
                .iter()
                .map(|segment| {
                    let r = segment.bounds();
                    TextBox::new(
                        segment.text(),
                        r.left().value,
                        r.bottom().value,
                        r.right().value,
                        r.top().value,
                    )
                })
                .collect();
            debug!("Page {}: {} text segments", page_number, boxes.len());

            let mut table_number = 0;
            for grid in detect_tables(boxes, &self.options) {
                if let Some(table) = ExtractedTable::from_grid(page_number, table_number + 1, grid) {
                    table_number += 1;
                    tables.push(table);
                }
            }
        }

        info!("Extracted {} table(s)", tables.len());
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_dir_fails_to_bind() {
        let extractor = PdfiumTableExtractor::new(
            Some(PathBuf::from("/nonexistent/pdfium-dir")),
            LayoutOptions::default(),
        );
        assert!(matches!(
            extractor.extract(b"%PDF-1.4"),
            Err(TableError::PdfiumBindingFailed(_))
        ));
        assert!(extractor.check_binding().is_err());
    }
}
