//! Plain-text extraction for the supported document formats

use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::FileType;

/// Extract plain text from a file on disk
///
/// Extraction is synchronous and may be CPU heavy; callers run it on a
/// blocking thread.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Extractor for a file type
pub fn extractor_for(file_type: FileType) -> &'static dyn TextExtractor {
    match file_type {
        FileType::Pdf => &PDF_EXTRACTOR,
        FileType::Txt => &PlainTextExtractor,
        FileType::Docx => &DocxExtractor,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::file_parse(display_name(path), format!("Failed to read file: {}", e)))
}

/// UTF-8 text files; invalid sequences are replaced rather than rejected
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let bytes = read_bytes(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Longest a single `pdf-extract` run may take before the fallback is used
pub const PDF_EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

static PDF_EXTRACTOR: PdfExtractor = PdfExtractor {
    timeout: PDF_EXTRACT_TIMEOUT,
};

/// PDF via `pdf-extract`, falling back to per-page `lopdf` extraction
///
/// `pdf-extract` can stall or panic on unusual fonts, so it runs on its own
/// thread and is abandoned after `timeout`.
#[derive(Debug, Clone)]
pub struct PdfExtractor {
    timeout: Duration,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self {
            timeout: PDF_EXTRACT_TIMEOUT,
        }
    }
}

impl PdfExtractor {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn fallback(name: &str, data: &[u8]) -> Result<String> {
        let doc = lopdf::Document::load_mem(data)
            .map_err(|e| Error::file_parse(name, format!("Failed to load PDF: {}", e)))?;

        let mut pages = Vec::new();
        for page_number in doc.get_pages().keys() {
            match doc.extract_text(&[*page_number]) {
                Ok(text) if !text.trim().is_empty() => pages.push(text),
                Ok(_) => {}
                Err(e) => tracing::debug!("No text on page {} of {}: {}", page_number, name, e),
            }
        }
        Ok(pages.join("\n\n"))
    }

    /// Run `primary` on a worker thread, using the `lopdf` fallback when it
    /// fails, panics, returns nothing or exceeds the timeout
    fn extract_bounded<F>(&self, name: &str, data: Vec<u8>, primary: F) -> Result<String>
    where
        F: FnOnce(&[u8]) -> std::result::Result<String, String> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let worker_data = data.clone();
        let spawned = thread::Builder::new()
            .name("pdf-extract".to_string())
            .spawn(move || {
                let _ = tx.send(primary(&worker_data));
            });
        if let Err(e) = spawned {
            tracing::warn!("Could not start PDF extraction thread for {}: {}", name, e);
            return Self::fallback(name, &data);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
            Ok(Ok(_)) => Self::fallback(name, &data),
            Ok(Err(e)) => {
                tracing::warn!("pdf-extract failed on {}: {}, trying fallback", name, e);
                Self::fallback(name, &data)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // The worker cannot be killed; it is left to finish on its own
                tracing::error!(
                    "pdf-extract timed out after {:?} on {}, trying fallback",
                    self.timeout,
                    name
                );
                Self::fallback(name, &data)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("pdf-extract crashed on {}, trying fallback", name);
                Self::fallback(name, &data)
            }
        }
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let name = display_name(path);
        let data = read_bytes(path)?;

        let raw = self.extract_bounded(&name, data, |bytes| {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
        })?;

        let content = cleanup_pdf_text(&raw);
        if content.trim().is_empty() {
            return Err(Error::file_parse(
                name,
                "No text content could be extracted (image-only or encrypted PDF)",
            ));
        }
        Ok(content)
    }
}

/// Replace ligatures, typographic quotes and stray control characters
fn cleanup_pdf_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\0' => {}
            '\u{FB00}' => cleaned.push_str("ff"),
            '\u{FB01}' => cleaned.push_str("fi"),
            '\u{FB02}' => cleaned.push_str("fl"),
            '\u{FB03}' => cleaned.push_str("ffi"),
            '\u{FB04}' => cleaned.push_str("ffl"),
            '\u{2010}' | '\u{2011}' | '\u{2013}' => cleaned.push('-'),
            '\u{2014}' => cleaned.push_str("--"),
            '\u{2018}' | '\u{2019}' => cleaned.push('\''),
            '\u{201C}' | '\u{201D}' => cleaned.push('"'),
            '\u{2022}' => cleaned.push_str("* "),
            '\u{2026}' => cleaned.push_str("..."),
            '\u{00A0}' => cleaned.push(' '),
            other => cleaned.push(other),
        }
    }

    // Trailing spaces per line, and runs of blank lines collapsed to one
    let mut out = String::with_capacity(cleaned.len());
    let mut blank_run = 0;
    for line in cleaned.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Word documents: paragraph text, table cells one per line
pub struct DocxExtractor;

impl DocxExtractor {
    fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
        let mut text = String::new();
        for child in &paragraph.children {
            if let docx_rs::ParagraphChild::Run(run) = child {
                for run_child in &run.children {
                    match run_child {
                        docx_rs::RunChild::Text(t) => text.push_str(&t.text),
                        docx_rs::RunChild::Tab(_) => text.push('\t'),
                        docx_rs::RunChild::Break(_) => text.push('\n'),
                        _ => {}
                    }
                }
            }
        }
        text
    }

    #[allow(irrefutable_let_patterns)]
    fn table_lines(table: &docx_rs::Table, out: &mut Vec<String>) {
        for row in &table.rows {
            let docx_rs::TableChild::TableRow(row) = row else {
                continue;
            };
            for cell in &row.cells {
                let docx_rs::TableRowChild::TableCell(cell) = cell else {
                    continue;
                };
                for content in &cell.children {
                    if let docx_rs::TableCellContent::Paragraph(p) = content {
                        let text = Self::paragraph_text(p);
                        if !text.trim().is_empty() {
                            out.push(text);
                        }
                    }
                }
            }
        }
    }
}

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let name = display_name(path);
        let data = read_bytes(path)?;
        let doc = docx_rs::read_docx(&data).map_err(|e| Error::file_parse(name, e.to_string()))?;

        let mut paragraphs = Vec::new();
        for child in &doc.document.children {
            match child {
                docx_rs::DocumentChild::Paragraph(p) => {
                    let text = Self::paragraph_text(p);
                    if !text.trim().is_empty() {
                        paragraphs.push(text);
                    }
                }
                docx_rs::DocumentChild::Table(table) => {
                    let mut cells = Vec::new();
                    Self::table_lines(table, &mut cells);
                    if !cells.is_empty() {
                        paragraphs.push(cells.join("\n"));
                    }
                }
                _ => {}
            }
        }

        Ok(paragraphs.join("\n\n"))
    }
}
