//! Word document (`.docx`) text extraction and corpus file generation.
//!
//! A `.docx` file is a ZIP archive; the body lives in `word/document.xml`.
//! Extraction walks the body's top-level `w:p` paragraphs in document order
//! and joins their text with `\n`. Paragraphs nested in tables, text boxes
//! or content controls (`w:sdt`) are not part of the body paragraph list and
//! are skipped.
//!
//! [`extract_directory`] turns a folder of Word files into a single corpus
//! text file where every document starts with a `=== <filename> ===` header.
//! The output is truncated on open, so re-running produces identical bytes.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const DOCX_EXTENSION: &str = "docx";

/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Elements whose paragraphs are not body paragraphs.
const NESTED_CONTAINERS: [&[u8]; 3] = [b"tbl", b"txbxContent", b"sdt"];

/// True when the path has a `.docx` extension (case-insensitive).
pub fn is_docx(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(DOCX_EXTENSION))
        .unwrap_or(false)
}

/// Extract the body paragraphs of a `.docx` file, joined with `\n`.
///
/// `path` is only used for error reporting.
pub fn docx_to_text(bytes: &[u8], path: &Path) -> Result<String> {
    let xml = read_document_xml(bytes).map_err(|reason| Error::unsupported(path, reason))?;
    let paragraphs = body_paragraphs(&xml).map_err(|reason| Error::unsupported(path, reason))?;
    Ok(paragraphs.join("\n"))
}

fn read_document_xml(bytes: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }
    Ok(out)
}

fn body_paragraphs(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    // Whitespace inside w:t is significant (xml:space="preserve").
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut buf = Vec::new();
    let mut nested_depth = 0usize;
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if NESTED_CONTAINERS.contains(&name) {
                    nested_depth += 1;
                } else if nested_depth == 0 {
                    match name {
                        b"p" => current = Some(String::new()),
                        b"t" => in_text = current.is_some(),
                        _ => {}
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if nested_depth == 0 {
                    if let Some(para) = current.as_mut() {
                        match e.local_name().as_ref() {
                            b"tab" => para.push('\t'),
                            b"br" | b"cr" => para.push('\n'),
                            _ => {}
                        }
                    } else if e.local_name().as_ref() == b"p" {
                        paragraphs.push(String::new());
                    }
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                if let Some(para) = current.as_mut() {
                    para.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if NESTED_CONTAINERS.contains(&name) {
                    nested_depth = nested_depth.saturating_sub(1);
                } else if nested_depth == 0 {
                    match name {
                        b"t" => in_text = false,
                        b"p" => {
                            if let Some(para) = current.take() {
                                paragraphs.push(para);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

/// Outcome of an [`extract_directory`] run.
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// File names written to the corpus file, in output order.
    pub written: Vec<String>,
    /// Files that could not be parsed, with the reason.
    pub skipped: Vec<(PathBuf, Error)>,
}

/// Convert every `.docx` in `source_dir` into one corpus text file.
///
/// Files are processed in file-name order. Each document is written as
/// `=== <filename> ===\n<text>\n\n`. Unparseable files are logged and skipped.
pub fn extract_directory(source_dir: &Path, output: &Path) -> Result<ExtractReport> {
    if !source_dir.is_dir() {
        return Err(Error::NotFound {
            path: source_dir.to_path_buf(),
        });
    }

    let mut sources: Vec<PathBuf> = std::fs::read_dir(source_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_docx(p))
        .collect();
    sources.sort();

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut out = BufWriter::new(File::create(output)?);
    let mut report = ExtractReport::default();

    for path in sources {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let text = match std::fs::read(&path)
            .map_err(Error::from)
            .and_then(|bytes| docx_to_text(&bytes, &path))
        {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable Word document");
                report.skipped.push((path, e));
                continue;
            }
        };

        write!(out, "=== {} ===\n{}\n\n", filename, text)?;
        report.written.push(filename);
    }

    out.flush()?;
    info!(
        written = report.written.len(),
        skipped = report.skipped.len(),
        output = %output.display(),
        "extraction complete"
    );
    Ok(report)
}

/// CLI entry point for `docforge extract`.
pub fn run_extract(source_dir: &Path, output: &Path) -> anyhow::Result<()> {
    let report = extract_directory(source_dir, output)?;
    println!("extract {}", source_dir.display());
    println!("  documents written: {}", report.written.len());
    println!("  skipped: {}", report.skipped.len());
    for (path, err) in &report.skipped {
        println!("    {}: {}", path.display(), err);
    }
    println!("Extraction complete! Text saved in {}", output.display());
    Ok(())
}
