#[cfg(test)]
mod tests;

use std::fs;
use std::path::Path;

use itertools::Itertools;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::{RagError, Result};

/// Uploads larger than this are rejected before they are read
pub const MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;

const SKIPPED_HTML_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];
const BLOCK_HTML_TAGS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "header", "footer", "table", "ul", "ol", "pre", "blockquote",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Html,
    Json,
}

impl DocumentFormat {
    /// Pick a format from a file extension, ignoring case and a leading dot
    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_lowercase().as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub filename: String,
    pub size: u64,
    pub extension: String,
}

/// Text pulled out of a document, before it is chunked into knowledge entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    /// `<title>` for HTML, the first level-one heading for Markdown
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub text: String,
    pub title: Option<String>,
    pub metadata: DocumentMetadata,
}

/// Read and extract the text of a document on disk.
///
/// Fails with [`RagError::Ingestion`] for unsupported extensions, files over
/// [`MAX_DOCUMENT_BYTES`], undecodable content, and documents with no text left
/// after cleanup.
#[inline]
pub fn parse_document(path: &Path) -> Result<ParsedDocument> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let Some(format) = DocumentFormat::from_extension(&extension) else {
        return Err(RagError::Ingestion(format!(
            "File type .{} not supported. Allowed: .txt, .md, .markdown, .html, .htm, .json",
            extension
        )));
    };

    let size = fs::metadata(path)
        .map_err(|e| RagError::Ingestion(format!("Cannot read {}: {}", path.display(), e)))?
        .len();
    if size > MAX_DOCUMENT_BYTES {
        return Err(RagError::Ingestion(format!(
            "File too large. Maximum size: {}MB",
            MAX_DOCUMENT_BYTES / (1024 * 1024)
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| RagError::Ingestion(format!("Cannot read {}: {}", path.display(), e)))?;
    let extracted = extract_text(&raw, format)?;

    debug!(
        "Parsed {} as {:?}: {} characters",
        filename,
        format,
        extracted.text.chars().count()
    );

    Ok(ParsedDocument {
        text: extracted.text,
        title: extracted.title,
        metadata: DocumentMetadata {
            filename,
            size,
            extension,
        },
    })
}

/// Extract and clean the text of an in-memory document
#[inline]
pub fn extract_text(raw: &str, format: DocumentFormat) -> Result<ExtractedText> {
    let (text, title) = match format {
        DocumentFormat::PlainText => (raw.to_string(), None),
        DocumentFormat::Markdown => markdown_to_text(raw),
        DocumentFormat::Html => html_to_text(raw)?,
        DocumentFormat::Json => {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| RagError::Ingestion(format!("Invalid JSON document: {}", e)))?;
            let pretty = serde_json::to_string_pretty(&value)
                .map_err(|e| RagError::Ingestion(format!("Invalid JSON document: {}", e)))?;
            (pretty, None)
        }
    };

    let text = clean_text(&text);
    if text.is_empty() {
        return Err(RagError::Ingestion(
            "Document contains no extractable text".to_string(),
        ));
    }

    Ok(ExtractedText { text, title })
}

/// Collapse runs of whitespace inside lines, trim every line and drop blank ones
#[inline]
pub fn clean_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().join(" "))
        .filter(|line| !line.is_empty())
        .join("\n")
}

fn markdown_to_text(markdown: &str) -> (String, Option<String>) {
    let mut text = String::new();
    let mut title = None;
    let mut heading: Option<(HeadingLevel, String)> = None;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading = Some((level, String::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, heading_text)) = heading.take() {
                    let heading_text = heading_text.trim();
                    if title.is_none() && level == HeadingLevel::H1 && !heading_text.is_empty() {
                        title = Some(heading_text.to_string());
                    }
                    text.push_str(heading_text);
                    text.push('\n');
                }
            }
            Event::Start(Tag::Item) => text.push_str("- "),
            Event::Text(fragment) | Event::Code(fragment) => {
                heading
                    .as_mut()
                    .map_or(&mut text, |(_, heading_text)| heading_text)
                    .push_str(&fragment);
            }
            Event::SoftBreak | Event::HardBreak => {
                heading
                    .as_mut()
                    .map_or(&mut text, |(_, heading_text)| heading_text)
                    .push('\n');
            }
            Event::End(
                TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock | TagEnd::TableRow,
            ) => text.push('\n'),
            Event::End(TagEnd::TableCell) => text.push(' '),
            _ => {}
        }
    }

    (text, title)
}

fn html_to_text(html: &str) -> Result<(String, Option<String>)> {
    let document = Html::parse_document(html);
    let title_selector = selector("title")?;
    let body_selector = selector("body")?;

    let title = document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty());

    let root = document
        .select(&body_selector)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    collect_visible_text(root, &mut text);
    Ok((text, title))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| RagError::Ingestion(format!("Invalid selector {}: {}", css, e)))
}

fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if SKIPPED_HTML_TAGS.contains(&name) {
                continue;
            }
            let block = BLOCK_HTML_TAGS.contains(&name);
            if block {
                out.push('\n');
            }
            collect_visible_text(child_element, out);
            if block {
                out.push('\n');
            }
        }
    }
}
