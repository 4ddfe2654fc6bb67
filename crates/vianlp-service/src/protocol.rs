//! Line-delimited JSON protocol
//!
//! Each input line is one [`Request`]; each output line is one [`Response`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vianlp_core::{DocumentAnalysis, PageEntity, PageMatch, PageTable, PdfMetadata};

/// Request from the parent process
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Request {
    /// Base64-encoded PDF
    pub content: String,
    /// Opaque correlation id, echoed back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// Response written to stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    /// Extraction results
    Extraction(ExtractionWire),
    /// Error message
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    /// Lifecycle notice
    Message { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>, id: Option<Value>) -> Self {
        Self::Error {
            error: message.into(),
            id,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Extraction results for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub entities: Vec<EntityWire>,
    pub matches: Vec<MatchWire>,
    pub tables: Vec<TableWire>,
    pub metadata: MetadataWire,
}

impl ExtractionWire {
    pub fn from_analysis(analysis: DocumentAnalysis, id: Option<Value>) -> Self {
        let metadata = MetadataWire::new(analysis.page_count, analysis.metadata);
        Self {
            id,
            entities: analysis.entities.into_iter().map(EntityWire::from).collect(),
            matches: analysis.matches.into_iter().map(MatchWire::from).collect(),
            tables: analysis.tables.into_iter().map(TableWire::from).collect(),
            metadata,
        }
    }
}

/// Named entity for the wire protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityWire {
    pub text: String,
    pub label: String,
    /// Character offsets into the page text
    pub start: usize,
    pub end: usize,
    pub page: u32,
    pub context: String,
}

impl From<PageEntity> for EntityWire {
    fn from(entity: PageEntity) -> Self {
        Self {
            text: entity.text,
            label: entity.label,
            start: entity.start,
            end: entity.end,
            page: entity.page,
            context: entity.context,
        }
    }
}

/// Rule match for the wire protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchWire {
    pub pattern: String,
    pub text: String,
    /// Token indices, end exclusive
    pub start: usize,
    pub end: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub page: u32,
    pub context: String,
}

impl From<PageMatch> for MatchWire {
    fn from(m: PageMatch) -> Self {
        Self {
            pattern: m.pattern,
            text: m.text,
            start: m.start,
            end: m.end,
            start_char: m.start_char,
            end_char: m.end_char,
            page: m.page,
            context: m.context,
        }
    }
}

/// Table for the wire protocol; empty cells are `null`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableWire {
    pub page: u32,
    pub data: Vec<Vec<Option<String>>>,
}

impl From<PageTable> for TableWire {
    fn from(table: PageTable) -> Self {
        Self {
            page: table.page,
            data: table.data,
        }
    }
}

/// Document metadata for the wire protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataWire {
    pub page_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

impl MetadataWire {
    pub fn new(page_count: usize, metadata: PdfMetadata) -> Self {
        Self {
            page_count,
            title: metadata.title,
            author: metadata.author,
            subject: metadata.subject,
            keywords: metadata.keywords,
        }
    }
}
