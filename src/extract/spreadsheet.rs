//! Spreadsheet flattening.
//!
//! Excel/ODS workbooks are read with `calamine` (first worksheet only),
//! CSV files with `csv`. Both are re-emitted as CSV text with the header row
//! kept and fully empty rows dropped.

use std::path::Path;

use async_trait::async_trait;
use calamine::{Data, Reader, open_workbook_auto};

use crate::error::ExtractionError;
use crate::extract::{FileType, TextExtractor, run_blocking};

pub struct SpreadsheetReader;

#[async_trait]
impl TextExtractor for SpreadsheetReader {
    fn name(&self) -> &str {
        "spreadsheet"
    }

    async fn extract(&self, path: &Path, _file_type: FileType) -> Result<String, ExtractionError> {
        let owned = path.to_path_buf();
        run_blocking(path, move || {
            let is_csv = owned
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            let rows = if is_csv {
                read_csv_rows(&owned)?
            } else {
                read_workbook_rows(&owned)?
            };
            write_csv(&owned, rows)
        })
        .await
    }
}

fn decode_error(path: &Path, reason: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Decode {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_workbook_rows(path: &Path) -> Result<Vec<Vec<String>>, ExtractionError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| decode_error(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| decode_error(path, "workbook has no worksheets"))?
        .map_err(|e| decode_error(path, e))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>, ExtractionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| decode_error(path, e))?;

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| decode_error(path, e))
        })
        .collect()
}

fn write_csv(path: &Path, rows: Vec<Vec<String>>) -> Result<String, ExtractionError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    for row in rows
        .into_iter()
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
    {
        writer.write_record(&row).map_err(|e| decode_error(path, e))?;
    }

    let bytes = writer.into_inner().map_err(|e| decode_error(path, e))?;
    String::from_utf8(bytes).map_err(|e| decode_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn csv_keeps_header_and_drops_empty_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.csv");
        std::fs::write(&path, "Item,Qty,Notes\nPump,4,\"316 SS, flanged\"\n,,\nValve,2,\n").unwrap();

        let text = SpreadsheetReader.extract(&path, FileType::Spreadsheet).await.unwrap();
        assert_eq!(text, "Item,Qty,Notes\nPump,4,\"316 SS, flanged\"\nValve,2,\n");
    }

    #[tokio::test]
    async fn corrupt_workbook_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.xlsx");
        std::fs::write(&path, b"not a workbook").unwrap();

        assert!(matches!(
            SpreadsheetReader.extract(&path, FileType::Spreadsheet).await,
            Err(ExtractionError::Decode { .. })
        ));
    }

    #[test]
    fn integral_floats_render_without_decimal_point() {
        assert_eq!(cell_text(&Data::Float(12.0)), "12");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::String("Bolt".into())), "Bolt");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
