use std::io::{Cursor, Read};

use calamine::Reader as _;
use quick_xml::{Reader, events::Event};

use crate::error::ExtractError;

const SLIDE_PREFIX: &str = "ppt/slides/slide";

/// Paragraph texts joined by newlines.
pub(super) fn extract_docx(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = docx_rs::read_docx(bytes).map_err(|err| ExtractError::extraction(filename, err))?;

    let mut paragraphs = Vec::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut text = String::new();
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            paragraphs.push(text);
        }
    }

    Ok(paragraphs.join("\n"))
}

/// Text of every slide in slide order, one line per paragraph.
pub(super) fn extract_pptx(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| ExtractError::extraction(filename, err))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix(SLIDE_PREFIX)?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_unstable();

    let mut content = String::new();
    for (_, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|err| ExtractError::extraction(filename, err))?
            .read_to_string(&mut xml)
            .map_err(|err| ExtractError::extraction(filename, err))?;

        for line in slide_paragraphs(&xml).map_err(|err| ExtractError::extraction(filename, err))?
        {
            content.push_str(&line);
            content.push('\n');
        }
    }

    Ok(content)
}

fn slide_paragraphs(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(e) if in_text => current.push_str(&e.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = current.trim();
                    if !line.is_empty() {
                        paragraphs.push(line.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

/// `Sheet: <name>` header followed by tab-joined rows, per sheet.
pub(super) fn extract_xlsx(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|err| ExtractError::extraction(filename, err))?;

    let mut content = String::new();
    for sheet_name in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|err| ExtractError::extraction(filename, err))?;

        content.push_str(&format!("Sheet: {sheet_name}\n"));
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| match cell {
                    calamine::Data::Empty => String::new(),
                    other => other.to_string(),
                })
                .collect();
            content.push_str(&cells.join("\t"));
            content.push('\n');
        }
        content.push('\n');
    }

    Ok(content)
}
