//! Document parsing.
//!
//! A parser turns raw source bytes into a normalized tree of sections,
//! chunks, and tables. The pipeline never sees source formats directly.

use engram_common::{MemoryError, Result};
use serde::Deserialize;

/// A contiguous span of extracted text.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedChunk {
    pub text: String,
    /// Position among siblings.
    #[serde(default)]
    pub order: usize,
    /// Character offset within the source, when known.
    #[serde(default)]
    pub offset: usize,
}

/// Structured tabular content.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedTable {
    #[serde(default)]
    pub name: String,
    pub rows: Vec<Vec<String>>,
    #[serde(default)]
    pub order: usize,
}

impl ParsedTable {
    /// Flatten rows into embeddable text, one row per line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if !self.name.is_empty() {
            out.push_str(&self.name);
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(&row.join(" | "));
            out.push('\n');
        }
        out
    }
}

/// A heading-delimited span of a document; sections nest.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedSection {
    pub heading: String,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub sections: Vec<ParsedSection>,
    #[serde(default)]
    pub chunks: Vec<ParsedChunk>,
    #[serde(default)]
    pub tables: Vec<ParsedTable>,
}

/// Normalized parse output.
///
/// Top-level chunks and tables belong to documents without headings; the
/// pipeline attaches them to a synthesized default section.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<ParsedSection>,
    #[serde(default)]
    pub chunks: Vec<ParsedChunk>,
    #[serde(default)]
    pub tables: Vec<ParsedTable>,
}

impl ParsedDocument {
    /// True when the parse produced no retrievable content at all.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.tables.is_empty() && self.sections.iter().all(section_empty)
    }
}

fn section_empty(section: &ParsedSection) -> bool {
    section.chunks.is_empty()
        && section.tables.is_empty()
        && section.sections.iter().all(section_empty)
}

/// Turns raw document bytes into a normalized tree.
pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &str;

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument>;
}

/// Parser for pre-structured JSON document trees.
///
/// Accepts the normalized tree shape directly; upstream extractors emit it.
pub struct JsonTreeParser;

impl DocumentParser for JsonTreeParser {
    fn name(&self) -> &str {
        "json-tree"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument> {
        let document: ParsedDocument = serde_json::from_slice(bytes)
            .map_err(|e| MemoryError::ParseFailure(e.to_string()))?;
        if document.is_empty() {
            return Err(MemoryError::ParseFailure(
                "document contains no sections, chunks, or tables".into(),
            ));
        }
        Ok(document)
    }
}
