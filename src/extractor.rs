use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::errors::ExtractionError;
use crate::models::{DocumentFormat, UploadedDocument};

/// Plain text pulled out of one uploaded document
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub file_name: String,
    pub format: DocumentFormat,
    pub text: String,
}

/// Turns PDF and PPTX uploads into plain text. Extraction is all-or-nothing.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    max_bytes: usize,
}

impl ContentExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Detect the format of an upload and extract its text
    pub fn extract_upload(&self, document: &UploadedDocument) -> Result<ExtractedDocument, ExtractionError> {
        let format = DocumentFormat::detect(&document.file_name, document.content_type.as_deref())
            .ok_or_else(|| {
                ExtractionError::UnsupportedFormat(format!(
                    "'{}' ({}) is neither a PDF nor a PPTX slide deck",
                    document.file_name,
                    document.content_type.as_deref().unwrap_or("unknown type")
                ))
            })?;

        let text = self.extract(&document.bytes, format)?;
        info!(
            file_name = %document.file_name,
            format = %format,
            text_length = text.len(),
            "Extracted document text"
        );

        Ok(ExtractedDocument {
            file_name: document.file_name.clone(),
            format,
            text,
        })
    }

    pub fn extract(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractionError> {
        if bytes.len() > self.max_bytes {
            return Err(ExtractionError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }
        if bytes.is_empty() {
            return Err(ExtractionError::Corrupt {
                format,
                reason: "document is empty".to_string(),
            });
        }

        let raw = match format {
            DocumentFormat::Pdf => extract_pdf(bytes)?,
            DocumentFormat::SlideDeck => extract_slides(bytes, self.max_bytes)?,
        };

        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(ExtractionError::NoText(format));
        }
        Ok(text)
    }

    /// Join several extracted documents into one source text for generation
    pub fn combine(documents: &[ExtractedDocument]) -> String {
        match documents {
            [single] => single.text.clone(),
            many => many
                .iter()
                .map(|doc| format!("=== {} ===\n{}", doc.file_name, doc.text))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    if !bytes.starts_with(b"%PDF-") {
        return Err(ExtractionError::Corrupt {
            format: DocumentFormat::Pdf,
            reason: "missing %PDF- header".to_string(),
        });
    }

    // pdf-extract panics on some malformed inputs
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractionError::Corrupt {
            format: DocumentFormat::Pdf,
            reason: format!("{:?}", e),
        }),
        Err(_) => Err(ExtractionError::Corrupt {
            format: DocumentFormat::Pdf,
            reason: "PDF parser aborted on malformed content".to_string(),
        }),
    }
}

fn slide_number(entry_name: &str) -> Option<u32> {
    static SLIDE_ENTRY: OnceLock<Regex> = OnceLock::new();
    let pattern = SLIDE_ENTRY.get_or_init(|| {
        Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("slide entry pattern is valid")
    });
    pattern
        .captures(entry_name)
        .and_then(|caps| caps.get(1))
        .and_then(|number| number.as_str().parse().ok())
}

/// Slide XML is decompressed against `max_bytes` in total, not just the archive size
fn extract_slides(bytes: &[u8], max_bytes: usize) -> Result<String, ExtractionError> {
    let corrupt = |reason: String| ExtractionError::Corrupt {
        format: DocumentFormat::SlideDeck,
        reason,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| corrupt(format!("not a valid PPTX archive: {}", e)))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|number| (number, name.to_string())))
        .collect();
    slides.sort_by_key(|(number, _)| *number);

    if slides.is_empty() {
        return Err(corrupt("archive contains no slides".to_string()));
    }

    let mut sections = Vec::with_capacity(slides.len());
    let mut inflated = 0usize;
    for (number, entry_name) in slides {
        let remaining = max_bytes.saturating_sub(inflated);
        let mut raw = Vec::new();
        archive
            .by_name(&entry_name)
            .map_err(|e| corrupt(format!("slide {} unreadable: {}", number, e)))?
            .take(remaining as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|e| corrupt(format!("slide {} unreadable: {}", number, e)))?;

        inflated += raw.len();
        if inflated > max_bytes {
            return Err(ExtractionError::TooLarge {
                size: inflated,
                limit: max_bytes,
            });
        }
        let xml = String::from_utf8(raw).map_err(|e| corrupt(format!("slide {} is not UTF-8: {}", number, e)))?;

        let text = slide_text(&xml).map_err(|e| corrupt(format!("slide {} is not valid XML: {}", number, e)))?;
        debug!(slide = number, text_length = text.len(), "Parsed slide");
        if !text.trim().is_empty() {
            sections.push(text.trim_end().to_string());
        }
    }

    Ok(sections.join("\n\n"))
}

/// Collect `<a:t>` runs; paragraphs end with a newline
fn slide_text(xml: &str) -> quick_xml::Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"br" => out.push('\n'),
            Event::Text(t) if in_text_run => out.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn normalize_text(raw: &str) -> String {
    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    let blank_runs = BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("blank line pattern is valid"));

    let trimmed_lines = raw
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    blank_runs.replace_all(&trimmed_lines, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn slide_xml(paragraphs: &[&str]) -> String {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<a:p><a:r><a:t>{}</a:t></a:r></a:p>", p))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody>{}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
            body
        )
    }

    fn build_pptx(entries: &[(&str, String)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("[Content_Types].xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<Types/>").unwrap();
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(1024 * 1024)
    }

    #[test]
    fn test_slides_are_read_in_numeric_order() {
        let bytes = build_pptx(&[
            ("ppt/slides/slide10.xml", slide_xml(&["Tenth slide"])),
            ("ppt/slides/slide2.xml", slide_xml(&["Second slide", "More &amp; more"])),
            ("ppt/slides/slide1.xml", slide_xml(&["Photosynthesis"])),
            ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>".to_string()),
        ]);

        let text = extractor().extract(&bytes, DocumentFormat::SlideDeck).unwrap();
        assert_eq!(text, "Photosynthesis\n\nSecond slide\nMore & more\n\nTenth slide");
    }

    #[test]
    fn test_archive_without_slides_is_corrupt() {
        let bytes = build_pptx(&[("docProps/app.xml", "<Properties/>".to_string())]);
        let err = extractor().extract(&bytes, DocumentFormat::SlideDeck).unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { format: DocumentFormat::SlideDeck, .. }));
    }

    #[test]
    fn test_slides_without_text_yield_no_text() {
        let bytes = build_pptx(&[("ppt/slides/slide1.xml", slide_xml(&[]))]);
        let err = extractor().extract(&bytes, DocumentFormat::SlideDeck).unwrap_err();
        assert!(matches!(err, ExtractionError::NoText(DocumentFormat::SlideDeck)));
    }

    #[test]
    fn test_malformed_slide_xml_is_corrupt() {
        let bytes = build_pptx(&[(
            "ppt/slides/slide1.xml",
            "<p:sld><a:p><a:t>open</a:p></p:sld>".to_string(),
        )]);
        let err = extractor().extract(&bytes, DocumentFormat::SlideDeck).unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { .. }));
    }

    #[test]
    fn test_non_zip_slide_deck_is_corrupt() {
        let err = extractor()
            .extract(b"definitely not a zip", DocumentFormat::SlideDeck)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { .. }));
    }

    #[test]
    fn test_pdf_without_header_is_corrupt() {
        let err = extractor().extract(b"hello world", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { format: DocumentFormat::Pdf, .. }));
    }

    #[test]
    fn test_truncated_pdf_is_corrupt() {
        let err = extractor()
            .extract(b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog", DocumentFormat::Pdf)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { format: DocumentFormat::Pdf, .. }));
    }

    #[test]
    fn test_size_limit_and_empty_input() {
        let small = ContentExtractor::new(4);
        let err = small.extract(b"%PDF-1.7", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractionError::TooLarge { size: 8, limit: 4 }));

        let err = extractor().extract(b"", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { .. }));
    }

    #[test]
    fn test_slide_limit_counts_all_slides() {
        let filler = "chlorophyll ".repeat(500);
        let bytes = build_pptx(&[
            ("ppt/slides/slide1.xml", slide_xml(&[&filler])),
            ("ppt/slides/slide2.xml", slide_xml(&[&filler])),
        ]);
        // each slide fits on its own, both together do not
        let limit = slide_xml(&[&filler]).len() + 100;
        assert!(bytes.len() < limit);

        let err = ContentExtractor::new(limit)
            .extract(&bytes, DocumentFormat::SlideDeck)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::TooLarge { limit: l, .. } if l == limit));
    }

    #[test]
    fn test_unsupported_upload_is_rejected() {
        let upload = UploadedDocument {
            file_name: "notes.docx".to_string(),
            content_type: Some("application/msword".to_string()),
            bytes: b"PK\x03\x04".to_vec(),
        };
        let err = extractor().extract_upload(&upload).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_normalize_text_collapses_blank_runs() {
        assert_eq!(normalize_text("  a  \n\n\n\n b\t\n"), "a\n\n b");
    }

    #[test]
    fn test_combine_labels_multiple_documents() {
        let docs = vec![
            ExtractedDocument {
                file_name: "a.pdf".into(),
                format: DocumentFormat::Pdf,
                text: "alpha".into(),
            },
            ExtractedDocument {
                file_name: "b.pptx".into(),
                format: DocumentFormat::SlideDeck,
                text: "beta".into(),
            },
        ];
        assert_eq!(ContentExtractor::combine(&docs[..1]), "alpha");
        assert_eq!(
            ContentExtractor::combine(&docs),
            "=== a.pdf ===\nalpha\n\n=== b.pptx ===\nbeta"
        );
    }
}
