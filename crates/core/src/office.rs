//! Text extraction for everything that is neither an image nor a PDF: plain
//! text formats directly, OOXML documents through their XML parts.

use crate::error::LoadError;
use crate::models::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::path::Path;

/// Decompressed size cap for a single XML part of an OOXML archive.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub trait FileExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<Document>, LoadError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredFileLoader;

impl FileExtractor for StructuredFileLoader {
    fn extract(&self, path: &Path) -> Result<Vec<Document>, LoadError> {
        let source = path.to_string_lossy().to_string();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let bytes = std::fs::read(path)?;

        let content = match extension.as_str() {
            "docx" => extract_docx(&bytes)?,
            "pptx" => extract_pptx(&bytes)?,
            _ => decode_plain_text(&bytes, &source)?,
        };

        Ok(vec![Document::new(content, source)])
    }
}

fn decode_plain_text(bytes: &[u8], source: &str) -> Result<String, LoadError> {
    if bytes.contains(&0) {
        return Err(LoadError::Unsupported(format!(
            "{source} looks like binary content"
        )));
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, LoadError> {
    let entry = archive
        .by_name(name)
        .map_err(|error| LoadError::Office(format!("{name}: {error}")))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Office(format!(
            "{name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<Cursor<&[u8]>>, LoadError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|error| LoadError::Office(error.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;
    xml_text(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .map(|name| {
            let number = name
                .trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX);
            (number, name.to_string())
        })
        .collect();
    slides.sort();

    let mut texts = Vec::new();
    for (_, name) in slides {
        let xml = read_zip_entry(&mut archive, &name)?;
        let text = xml_text(&xml, b"p")?;
        if !text.trim().is_empty() {
            texts.push(text.trim().to_string());
        }
    }
    Ok(texts.join("\n\n"))
}

/// Concatenates the contents of every `<*:t>` element, ending a line at each
/// closing `paragraph` element.
fn xml_text(xml: &[u8], paragraph: &[u8]) -> Result<String, LoadError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(element)) => {
                let name = element.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph {
                    out.push('\n');
                }
            }
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| LoadError::Office(error.to_string()))?;
                out.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(LoadError::Office(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
