use epub::doc::EpubDoc;
use html2text::from_read;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::error::{ConvertError, Result};
use crate::text::TextProcessor;

const WRAP_WIDTH: usize = 80;

/// Plain text of an EPUB in reading order, one blank line between documents.
pub fn extract_text(epub_bytes: &[u8], processor: &TextProcessor, aggressive: bool) -> Result<String> {
    let mut doc = EpubDoc::from_reader(Cursor::new(epub_bytes.to_vec()))
        .map_err(|e| ConvertError::Epub(e.to_string()))?;

    let mut documents = Vec::new();
    loop {
        if let Some((html_content, _mime)) = doc.get_current_str() {
            let plain_text = from_read(html_content.as_bytes(), WRAP_WIDTH);
            let cleaned = processor.clean_text(&plain_text, aggressive);
            if !cleaned.is_empty() {
                documents.push(cleaned);
            }
        }
        if !doc.go_next() {
            break;
        }
    }

    log::debug!("Extracted {} documents from EPUB", documents.len());
    Ok(documents.join("\n\n"))
}

/// Reads a source file: `.epub` is extracted, anything else is taken as UTF-8 text.
pub fn read_source(path: &Path, processor: &TextProcessor, aggressive: bool) -> Result<String> {
    let is_epub = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));

    if is_epub {
        extract_text(&fs::read(path)?, processor, aggressive)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}
