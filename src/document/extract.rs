//! File-in, text-out extraction for uploaded documents.

use lazy_static::lazy_static;
use log::{ debug, warn };
use regex::Regex;
use std::fs::{ self, File };
use std::io::{ Read, Seek };
use std::path::Path;
use zip::ZipArchive;

use crate::error::DocumentError;

pub const UNSUPPORTED_SENTINEL: &str =
    "[Unsupported file type: only PDF, DOCX, TXT, CSV, XLSX allowed]";

lazy_static! {
    static ref DOCX_PARAGRAPH: Regex = Regex::new(r"(?s)<w:p[ >].*?</w:p>").unwrap();
    static ref DOCX_RUN: Regex = Regex::new(r"<w:t(?: [^>]*)?>([^<]*)</w:t>|<w:tab/>").unwrap();
    static ref SHARED_STRING: Regex = Regex::new(r"(?s)<si>(.*?)</si>").unwrap();
    static ref INLINE_TEXT: Regex = Regex::new(r"<t(?: [^>]*)?>([^<]*)</t>").unwrap();
    static ref SHEET_ROW: Regex = Regex::new(r"(?s)<row\b[^>]*?(?:/>|>(.*?)</row>)").unwrap();
    static ref SHEET_CELL: Regex = Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").unwrap();
    static ref CELL_REF: Regex = Regex::new(r#"\br="([A-Z]+)\d+""#).unwrap();
    static ref CELL_TYPE: Regex = Regex::new(r#"\bt="(\w+)""#).unwrap();
    static ref CELL_VALUE: Regex = Regex::new(r"<v>([^<]*)</v>").unwrap();
}

/// Outcome of extracting one file. Only `Text` carries document content;
/// the other variants render as bracketed sentinel strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Text(String),
    Empty(&'static str),
    Unsupported,
    Failed(String),
}

impl Extraction {
    /// Extracted text, or the sentinel standing in for it.
    pub fn as_text(&self) -> String {
        match self {
            Extraction::Text(text) => text.clone(),
            Extraction::Empty(sentinel) => sentinel.to_string(),
            Extraction::Unsupported => UNSUPPORTED_SENTINEL.to_string(),
            Extraction::Failed(cause) => format!("[Error extracting text: {}]", cause),
        }
    }

    pub fn into_result(self) -> Result<String, DocumentError> {
        match self {
            Extraction::Text(text) => Ok(text),
            Extraction::Empty(_) => Err(DocumentError::Empty),
            Extraction::Unsupported => Err(DocumentError::Unsupported(UNSUPPORTED_SENTINEL.to_string())),
            Extraction::Failed(cause) => Err(DocumentError::Extraction(cause)),
        }
    }
}

/// Dispatches on the file extension. Never fails; problems become sentinels.
pub fn extract_text(path: &Path) -> Extraction {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    debug!("Extracting text from {} (.{})", path.display(), ext);

    let result = match ext.as_str() {
        "pdf" => extract_pdf(path).map(|t| non_empty_or(t, "[No readable text in PDF]")),
        "docx" => extract_docx(path).map(|t| non_empty_or(t, "[No readable text in DOCX]")),
        "txt" => extract_txt(path).map(|t| non_empty_or(t, "[Empty TXT file]")),
        "csv" => extract_csv(path).map(Extraction::Text),
        "xlsx" => extract_xlsx(path).map(Extraction::Text),
        _ => Ok(Extraction::Unsupported),
    };

    result.unwrap_or_else(|e| {
        warn!("Text extraction failed for {}: {}", path.display(), e);
        Extraction::Failed(e)
    })
}

fn non_empty_or(text: String, sentinel: &'static str) -> Extraction {
    let text = text.trim();
    if text.is_empty() { Extraction::Empty(sentinel) } else { Extraction::Text(text.to_string()) }
}

fn extract_pdf(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| format!("PDF parse error: {}", e))
}

fn extract_txt(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_zip_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String, String> {
    let mut entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(|e| format!("{}: {}", name, e))?;
    Ok(xml)
}

fn open_zip(path: &Path) -> Result<ZipArchive<File>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    ZipArchive::new(file).map_err(|e| format!("Failed to open zip archive: {}", e))
}

fn extract_docx(path: &Path) -> Result<String, String> {
    let mut archive = open_zip(path)?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;
    Ok(docx_paragraphs(&xml).join("\n"))
}

/// Non-blank paragraph texts of a WordprocessingML body.
fn docx_paragraphs(xml: &str) -> Vec<String> {
    DOCX_PARAGRAPH.find_iter(xml)
        .map(|para| {
            DOCX_RUN.captures_iter(para.as_str())
                .map(|run| match run.get(1) {
                    Some(text) => unescape_xml(text.as_str()),
                    None => "\t".to_string(),
                })
                .collect::<String>()
        })
        .filter(|text| !text.trim().is_empty())
        .collect()
}

fn extract_xlsx(path: &Path) -> Result<String, String> {
    let mut archive = open_zip(path)?;
    let shared = match read_zip_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml),
        Err(_) => Vec::new(),
    };
    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    sheets.sort_by_key(|n| (n.len(), n.clone()));
    let first = sheets.first().ok_or("workbook has no worksheets")?;
    let xml = read_zip_entry(&mut archive, first)?;
    let rows = sheet_rows(&xml, &shared)?;
    Ok(render_frame("Excel", rows))
}

fn shared_strings(xml: &str) -> Vec<String> {
    SHARED_STRING.captures_iter(xml)
        .map(|si| {
            INLINE_TEXT.captures_iter(&si[1])
                .map(|t| unescape_xml(&t[1]))
                .collect::<String>()
        })
        .collect()
}

/// Highest column a worksheet may address (`XFD`).
const MAX_COLUMN: usize = 16383;

/// Zero-based column of a cell reference's letters, or `None` past `XFD`.
fn column_index(letters: &str) -> Option<usize> {
    let number = letters.bytes().try_fold(0usize, |acc, b| {
        acc.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)
    })?;
    number.checked_sub(1).filter(|column| *column <= MAX_COLUMN)
}

fn sheet_rows(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>, String> {
    let mut rows = Vec::new();
    for row in SHEET_ROW.captures_iter(xml) {
        let Some(body) = row.get(1) else {
            continue;
        };
        let mut cells: Vec<String> = Vec::new();
        for cell in SHEET_CELL.captures_iter(body.as_str()) {
            let attrs = &cell[1];
            let column = match CELL_REF.captures(attrs) {
                Some(reference) =>
                    column_index(&reference[1]).ok_or("cell reference is beyond column XFD")?,
                None => cells.len(),
            };
            if column > MAX_COLUMN {
                return Err("row has more than 16384 cells".to_string());
            }
            let content = cell.get(2).map(|m| m.as_str()).unwrap_or("");
            let value = match CELL_TYPE.captures(attrs).as_ref().map(|c| &c[1]) {
                Some("s") =>
                    CELL_VALUE.captures(content)
                        .and_then(|v| v[1].trim().parse::<usize>().ok())
                        .and_then(|idx| shared.get(idx).cloned())
                        .unwrap_or_default(),
                Some("inlineStr") =>
                    INLINE_TEXT.captures_iter(content)
                        .map(|t| unescape_xml(&t[1]))
                        .collect(),
                _ =>
                    CELL_VALUE.captures(content)
                        .map(|v| unescape_xml(&v[1]))
                        .unwrap_or_default(),
            };
            if cells.len() <= column {
                cells.resize(column + 1, String::new());
            }
            cells[column] = value;
        }
        if cells.iter().any(|c| !c.trim().is_empty()) {
            rows.push(cells);
        }
    }
    Ok(rows)
}

fn extract_csv(path: &Path) -> Result<String, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let text = String::from_utf8_lossy(&bytes);
    let rows: Vec<Vec<String>> = parse_csv(&text)
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .collect();
    if rows.is_empty() {
        return Err("No columns to parse from file".to_string());
    }
    Ok(render_frame("CSV", rows))
}

/// RFC 4180 records: quoted fields may hold commas, doubled quotes and newlines.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => {
                in_quotes = false;
            }
            ('"', false) if field.is_empty() => {
                in_quotes = true;
            }
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// `[<Kind> Content - N rows]` followed by a right-aligned table. The first
/// row is the header and is not counted.
fn render_frame(kind: &str, rows: Vec<Vec<String>>) -> String {
    let data_rows = rows.len().saturating_sub(1);
    format!("[{} Content - {} rows]\n{}", kind, data_rows, render_table(&rows))
}

fn render_table(rows: &[Vec<String>]) -> String {
    let columns = rows
        .iter()
        .map(|r| r.len())
        .max()
        .unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            rows.iter()
                .map(|r| r.get(i).map(|c| c.chars().count()).unwrap_or(0))
                .max()
                .unwrap_or(0)
        })
        .collect();

    rows.iter()
        .map(|row| {
            widths
                .iter()
                .enumerate()
                .map(|(i, width)| {
                    let cell = row.get(i).map(String::as_str).unwrap_or("");
                    format!("{:>width$}", cell, width = width)
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
