//! Word (`.docx`) text extraction.
//!
//! Reads `word/document.xml` from the OOXML zip. Body paragraphs come first,
//! one per line, followed by every table row with cells joined by `" | "`.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::ExtractionError;
use crate::extract::{FileType, TextExtractor, run_blocking};

pub struct DocxReader;

#[async_trait]
impl TextExtractor for DocxReader {
    fn name(&self) -> &str {
        "docx"
    }

    async fn extract(&self, path: &Path, _file_type: FileType) -> Result<String, ExtractionError> {
        let owned = path.to_path_buf();
        run_blocking(path, move || {
            let xml = read_document_xml(&owned)?;
            render_document(&xml).map_err(|e| ExtractionError::Decode {
                path: owned.clone(),
                reason: format!("malformed document.xml: {e}"),
            })
        })
        .await
    }
}

fn read_document_xml(path: &Path) -> Result<String, ExtractionError> {
    let decode = |reason: String| ExtractionError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| decode(format!("not a docx archive: {e}")))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| decode(format!("missing word/document.xml: {e}")))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| decode(format!("unreadable document.xml: {e}")))?;
    Ok(xml)
}

/// Paragraphs outside tables, then table rows.
///
/// Only `<w:t>` content is kept. Empty body paragraphs become blank lines;
/// empty paragraphs inside a cell are dropped.
pub(crate) fn render_document(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);

    let mut body: Vec<String> = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut cell: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:tbl" => table_depth += 1,
                b"w:tr" => cells.clear(),
                b"w:tc" => cell.clear(),
                b"w:p" => paragraph.clear(),
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if e.name().as_ref() == b"w:p" && table_depth == 0 {
                    body.push(String::new());
                }
            }
            Event::Text(e) if in_text => paragraph.push_str(&e.unescape()?),
            Event::End(e) => match e.name().as_ref() {
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                b"w:tr" => rows.push(cells.join(" | ")),
                b"w:tc" => cells.push(cell.join("\n")),
                b"w:p" if table_depth == 0 => body.push(std::mem::take(&mut paragraph)),
                b"w:p" => cell.push(std::mem::take(&mut paragraph)),
                b"w:t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    body.extend(rows);
    Ok(body.join("\n"))
}
