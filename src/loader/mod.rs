// Document loading module
// Discovers supported files and extracts their text

#[cfg(test)]
mod tests;

use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use fancy_regex::Regex;
use pulldown_cmark::{Event, Parser, TagEnd};
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

static TRAILING_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+\n").expect("regex is valid"));
static BLANK_LINE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("regex is valid"));

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Documents directory not found: {0}")]
    MissingDirectory(PathBuf),
    #[error("Unsupported file type: {0}")]
    Unsupported(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to extract PDF text from {path}: {message}")]
    Pdf { path: PathBuf, message: String },
    #[error("Failed to parse DOCX {path}: {message}")]
    Docx { path: PathBuf, message: String },
    #[error("No text could be extracted from {0}")]
    Empty(PathBuf),
}

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
    Markdown,
}

impl DocumentKind {
    /// Detect the format from a file extension, ignoring case
    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Docx => write!(f, "docx"),
            Self::Text => write!(f, "txt"),
            Self::Markdown => write!(f, "md"),
        }
    }
}

/// A contiguous block of extracted text, one per PDF page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSection {
    pub page: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    /// Path relative to the documents directory, `/`-separated
    pub source: String,
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub sections: Vec<DocumentSection>,
    /// SHA-256 of the raw file bytes
    pub content_hash: String,
}

impl LoadedDocument {
    #[inline]
    pub fn char_count(&self) -> usize {
        self.sections.iter().map(|s| s.text.chars().count()).sum()
    }
}

/// List supported documents under `dir`, sorted by path
#[inline]
pub fn discover_documents(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, LoaderError> {
    if !dir.is_dir() {
        return Err(LoaderError::MissingDirectory(dir.to_path_buf()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut documents = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if DocumentKind::from_path(entry.path()).is_some() {
            documents.push(entry.into_path());
        } else {
            debug!("Ignoring unsupported file: {}", entry.path().display());
        }
    }

    documents.sort();
    debug!(
        "Discovered {} documents in {}",
        documents.len(),
        dir.display()
    );
    Ok(documents)
}

/// Stable identifier for a document: its path relative to the documents directory
#[inline]
pub fn source_key(documents_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(documents_dir).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Read and extract the text of a single document
#[inline]
pub fn load_document(documents_dir: &Path, path: &Path) -> Result<LoadedDocument, LoaderError> {
    let kind =
        DocumentKind::from_path(path).ok_or_else(|| LoaderError::Unsupported(path.to_path_buf()))?;
    let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_bytes(documents_dir, path, kind, &bytes)
}

fn load_bytes(
    documents_dir: &Path,
    path: &Path,
    kind: DocumentKind,
    bytes: &[u8],
) -> Result<LoadedDocument, LoaderError> {
    let raw_sections = match kind {
        DocumentKind::Text => vec![DocumentSection {
            page: None,
            text: decode_text(bytes),
        }],
        DocumentKind::Markdown => vec![DocumentSection {
            page: None,
            text: markdown_to_text(&decode_text(bytes)),
        }],
        DocumentKind::Pdf => extract_pdf_pages(path, bytes)?,
        DocumentKind::Docx => vec![DocumentSection {
            page: None,
            text: extract_docx_text(path, bytes)?,
        }],
    };

    let sections: Vec<DocumentSection> = raw_sections
        .into_iter()
        .map(|section| DocumentSection {
            page: section.page,
            text: normalize_text(&section.text),
        })
        .filter(|section| !section.text.is_empty())
        .collect();

    if sections.is_empty() {
        return Err(LoaderError::Empty(path.to_path_buf()));
    }

    let document = LoadedDocument {
        source: source_key(documents_dir, path),
        path: path.to_path_buf(),
        kind,
        sections,
        content_hash: content_hash(bytes),
    };

    debug!(
        "Loaded {} ({}, {} sections, {} chars)",
        document.source,
        kind,
        document.sections.len(),
        document.char_count()
    );

    Ok(document)
}

/// SHA-256 digest of raw file content
#[inline]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            warn!("Document is not valid UTF-8, replacing invalid sequences");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Collapse trailing spaces and runs of blank lines, normalize line endings
fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = TRAILING_WHITESPACE.replace_all(&unified, "\n");
    BLANK_LINE_RUNS
        .replace_all(&trimmed, "\n\n")
        .trim()
        .to_string()
}

fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::Item
                | TagEnd::BlockQuote(_)
                | TagEnd::TableRow,
            ) => text.push_str("\n\n"),
            Event::End(TagEnd::TableCell) => text.push(' '),
            _ => {}
        }
    }

    text
}

fn extract_pdf_pages(path: &Path, bytes: &[u8]) -> Result<Vec<DocumentSection>, LoaderError> {
    // pdf-extract panics on some malformed inputs
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| LoaderError::Pdf {
            path: path.to_path_buf(),
            message: "extractor panicked on malformed input".to_string(),
        })?
        .map_err(|e| LoaderError::Pdf {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| DocumentSection {
            page: u32::try_from(i + 1).ok(),
            text,
        })
        .collect())
}

fn extract_docx_text(path: &Path, bytes: &[u8]) -> Result<String, LoaderError> {
    let docx_error = |message: String| LoaderError::Docx {
        path: path.to_path_buf(),
        message,
    };

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| docx_error(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| docx_error(format!("missing word/document.xml: {}", e)))?
        .read_to_string(&mut xml)
        .map_err(|e| docx_error(e.to_string()))?;

    docx_paragraphs(&xml).map_err(docx_error)
}

/// Extract paragraph text from WordprocessingML, one blank line between paragraphs
fn docx_paragraphs(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                _ => {}
            },
            Ok(XmlEvent::Empty(ref e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(XmlEvent::End(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(XmlEvent::Text(e)) if in_text => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                current.push_str(&text);
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {}", e)),
            _ => {}
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n"))
}
