//! Text extraction from office documents.
//!
//! Open XML and OpenDocument files are ZIP archives of XML parts; their text
//! is collected with a streaming XML reader. Spreadsheets (xlsx, xls, ods) go
//! through calamine and come out as pipe-separated rows per sheet.

use std::io::{Cursor, Read, Seek};

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use quick_xml::events::Event;
use zip::ZipArchive;

use super::ProviderError;

/// Element names (local part) that shape the text of one XML dialect.
struct XmlLayout {
    paragraph: &'static [&'static [u8]],
    cell: &'static [&'static [u8]],
    /// Text is only taken inside these elements. `None` takes every text node.
    text: Option<&'static [&'static [u8]]>,
}

const WORDPROCESSING: XmlLayout = XmlLayout {
    paragraph: &[b"p"],
    cell: &[b"tc"],
    text: Some(&[b"t"]),
};

const PRESENTATION: XmlLayout = XmlLayout {
    paragraph: &[b"p"],
    cell: &[b"tc"],
    text: Some(&[b"t"]),
};

const OPEN_DOCUMENT: XmlLayout = XmlLayout {
    paragraph: &[b"p", b"h"],
    cell: &[b"table-cell"],
    text: None,
};

/// Body text of a Word document (`word/document.xml`).
pub fn docx_text(bytes: &[u8]) -> Result<String, ProviderError> {
    let mut archive = open_archive(bytes, "docx")?;
    let xml = read_part(&mut archive, "word/document.xml")?;
    xml_text(&xml, &WORDPROCESSING)
}

/// Slide text of a presentation, slides in numeric order.
pub fn pptx_text(bytes: &[u8]) -> Result<String, ProviderError> {
    let mut archive = open_archive(bytes, "pptx")?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut out = Vec::with_capacity(slides.len());
    for (_, name) in &slides {
        let xml = read_part(&mut archive, name)?;
        out.push(xml_text(&xml, &PRESENTATION)?);
    }
    Ok(out.join("\n\n"))
}

/// Text of an OpenDocument text file (`content.xml`).
pub fn odt_text(bytes: &[u8]) -> Result<String, ProviderError> {
    let mut archive = open_archive(bytes, "odt")?;
    let xml = read_part(&mut archive, "content.xml")?;
    xml_text(&xml, &OPEN_DOCUMENT)
}

/// Every sheet as a `## name` heading followed by ` | `-joined rows.
/// Rows without any value are skipped.
pub fn spreadsheet_text(bytes: &[u8]) -> Result<String, ProviderError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ProviderError::DocumentRead(format!("spreadsheet: {e}")))?;

    let mut out = String::new();
    for name in workbook.sheet_names().to_vec() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(sheet = %name, error = %e, "Worksheet skipped");
                continue;
            }
        };

        out.push_str(&format!("## {name}\n"));
        for row in range.rows() {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            out.push_str(&cells.join(" | "));
            out.push('\n');
        }
        out.push('\n');
    }
    Ok(out)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{f:.0}"),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        other => other.to_string(),
    }
}

fn open_archive<'a>(bytes: &'a [u8], kind: &str) -> Result<ZipArchive<Cursor<&'a [u8]>>, ProviderError> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ProviderError::DocumentRead(format!("{kind} archive: {e}")))
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, ProviderError> {
    let mut part = archive
        .by_name(name)
        .map_err(|e| ProviderError::DocumentRead(format!("{name}: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)?;
    Ok(xml)
}

fn xml_text(xml: &str, layout: &XmlLayout) -> Result<String, ProviderError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut text_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if is_text_element(layout, e.local_name().as_ref()) {
                    text_depth += 1;
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if is_text_element(layout, name) {
                    text_depth = text_depth.saturating_sub(1);
                } else if matches_any(layout.paragraph, name) {
                    out.push('\n');
                } else if matches_any(layout.cell, name) {
                    out.push('\t');
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" | b"line-break" => out.push('\n'),
                b"s" => out.push(' '),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if layout.text.is_none() || text_depth > 0 {
                    let text = e
                        .unescape()
                        .map_err(|err| ProviderError::DocumentRead(format!("XML text: {err}")))?;
                    out.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ProviderError::DocumentRead(format!("XML: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn is_text_element(layout: &XmlLayout, name: &[u8]) -> bool {
    layout.text.is_some_and(|names| matches_any(names, name))
}

fn matches_any(names: &[&[u8]], name: &[u8]) -> bool {
    names.iter().any(|n| *n == name)
}

/// Builds an in-memory ZIP archive from `(path, content)` parts.
#[cfg(test)]
pub(crate) fn zip_of(parts: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, content) in parts {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
