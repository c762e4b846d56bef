//! Text extraction for every supported document format.
//!
//! Loaders hand over raw bytes plus a [`Format`] (usually derived from the
//! file extension); this module returns plain UTF-8 text. Any failure,
//! whether an unknown extension or bytes that cannot be decoded, is a
//! [`QaError::UnsupportedFormat`] naming the format and the reason.
//!
//! | Format | Extensions | Method |
//! |---|---|---|
//! | Text | `txt` | UTF-8 |
//! | Markdown | `md`, `markdown` | UTF-8 |
//! | CSV | `csv` | UTF-8 |
//! | JSON | `json` | UTF-8, must parse |
//! | HTML | `html`, `htm` | `scraper`, tags stripped |
//! | PDF | `pdf` | `pdf-extract` |
//! | DOCX | `docx` | `zip` + `quick-xml` |
//! | PPTX | `pptx` | `zip` + `quick-xml` |

use std::io::Read;

use askdocs_core::{QaError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Markdown,
    Csv,
    Json,
    Html,
    Pdf,
    Docx,
    Pptx,
}

impl Format {
    /// Look up a format by file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(Format::Text),
            "md" | "markdown" => Some(Format::Markdown),
            "csv" => Some(Format::Csv),
            "json" => Some(Format::Json),
            "html" | "htm" => Some(Format::Html),
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "pptx" => Some(Format::Pptx),
            _ => None,
        }
    }

    /// Look up a format by MIME type, ignoring parameters like `; charset=`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence {
            "text/plain" => Some(Format::Text),
            "text/markdown" => Some(Format::Markdown),
            "text/csv" => Some(Format::Csv),
            "application/json" => Some(Format::Json),
            "text/html" => Some(Format::Html),
            "application/pdf" => Some(Format::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Format::Docx)
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Some(Format::Pptx)
            }
            _ => None,
        }
    }

    /// Resolve the format of a named file, preferring its extension and
    /// falling back to a declared MIME type.
    pub fn detect(file_name: &str, mime: Option<&str>) -> Result<Self> {
        let ext = std::path::Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_string());

        if let Some(format) = ext.as_deref().and_then(Format::from_extension) {
            return Ok(format);
        }
        if let Some(format) = mime.and_then(Format::from_mime) {
            return Ok(format);
        }
        Err(QaError::unsupported(
            ext.unwrap_or_else(|| file_name.to_string()),
            "no extractor for this file type",
        ))
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Format::Text => "text/plain",
            Format::Markdown => "text/markdown",
            Format::Csv => "text/csv",
            Format::Json => "application/json",
            Format::Html => "text/html",
            Format::Pdf => "application/pdf",
            Format::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Format::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Text => "txt",
            Format::Markdown => "md",
            Format::Csv => "csv",
            Format::Json => "json",
            Format::Html => "html",
            Format::Pdf => "pdf",
            Format::Docx => "docx",
            Format::Pptx => "pptx",
        }
    }
}

/// Extract plain text from `bytes` of the given format.
pub fn extract_text(bytes: &[u8], format: Format) -> Result<String> {
    let fail = |reason: String| QaError::unsupported(format.name(), reason);

    match format {
        Format::Text | Format::Markdown | Format::Csv => decode_utf8(bytes).map_err(fail),
        Format::Json => {
            let text = decode_utf8(bytes).map_err(fail)?;
            serde_json::from_str::<serde_json::Value>(&text)
                .map_err(|e| fail(format!("invalid JSON: {}", e)))?;
            Ok(text)
        }
        Format::Html => decode_utf8(bytes).map(|html| html_to_text(&html)).map_err(fail),
        Format::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| fail(format!("PDF extraction failed: {}", e))),
        Format::Docx => extract_docx(bytes).map_err(fail),
        Format::Pptx => extract_pptx(bytes).map_err(fail),
    }
}

fn decode_utf8(bytes: &[u8]) -> std::result::Result<String, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {}", e))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
}

/// Visible text of an HTML page, one text run per line.
fn html_to_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        if hidden {
            continue;
        }
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }

    lines.join("\n")
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> std::result::Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        ));
    }
    Ok(out)
}

fn open_zip(bytes: &[u8]) -> std::result::Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, String> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| format!("not an OOXML archive: {}", e))
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    ooxml_paragraphs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = open_zip(bytes)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = ooxml_paragraphs(&xml)?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Collect `<*:t>` text runs, separating `<*:p>` paragraphs with a blank
/// line. WordprocessingML and DrawingML share these local names.
fn ooxml_paragraphs(xml: &[u8]) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, content) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_detect_by_extension_then_mime() {
        assert_eq!(Format::detect("a/b/Notes.MD", None).unwrap(), Format::Markdown);
        assert_eq!(
            Format::detect("upload", Some("text/html; charset=utf-8")).unwrap(),
            Format::Html
        );
        let err = Format::detect("setup.exe", None).unwrap_err();
        assert!(matches!(err, QaError::UnsupportedFormat { ref format, .. } if format == "exe"));
    }

    #[test]
    fn test_plain_text_and_bom() {
        let text = extract_text("\u{feff}hello".as_bytes(), Format::Text).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_invalid_utf8_is_unsupported() {
        let err = extract_text(&[0xff, 0xfe, 0x00], Format::Csv).unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_json_must_parse() {
        assert!(extract_text(br#"{"a": 1}"#, Format::Json).is_ok());
        assert!(matches!(
            extract_text(b"{not json", Format::Json),
            Err(QaError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_html_strips_tags_and_scripts() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><p>Paris is <b>the</b> capital.</p><script>var x=1;</script></body></html>";
        let text = extract_text(html.as_bytes(), Format::Html).unwrap();
        assert!(text.contains("Paris is"));
        assert!(text.contains("capital."));
        assert!(!text.contains("<p>"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("p{}"));
    }

    #[test]
    fn test_invalid_pdf_is_unsupported() {
        let err = extract_text(b"not a pdf", Format::Pdf).unwrap_err();
        assert!(matches!(err, QaError::UnsupportedFormat { ref format, .. } if format == "pdf"));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"w\"><w:body>\
                   <w:p><w:r><w:t>First </w:t></w:r><w:r><w:t>para.</w:t></w:r></w:p>\
                   <w:p><w:r><w:t>Second &amp; last.</w:t></w:r></w:p>\
                   </w:body></w:document>";
        let docx = zip_with(&[("word/document.xml", xml)]);
        let text = extract_text(&docx, Format::Docx).unwrap();
        assert_eq!(text, "First para.\n\nSecond & last.");
    }

    #[test]
    fn test_docx_without_document_xml() {
        let docx = zip_with(&[("other.xml", "<x/>")]);
        assert!(extract_text(&docx, Format::Docx).is_err());
        assert!(extract_text(b"not a zip", Format::Docx).is_err());
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                t
            )
        };
        let (s1, s2, s10) = (slide("one"), slide("two"), slide("ten"));
        let pptx = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let text = extract_text(&pptx, Format::Pptx).unwrap();
        assert_eq!(text, "one\n\ntwo\n\nten");
    }
}
