//! Document analysis pipeline
//!
//! Decodes a payload, loads the PDF and analyses its pages on a fixed-size
//! rayon pool. Each page yields entities, rule matches and tables; results
//! are concatenated in page order.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::time::Instant;

use crate::matcher::Matcher;
use crate::ner::{char_slice, filter_labels, EntityRecognizer, DEFAULT_ENTITY_LABELS};
use crate::payload::{decode_document, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::pdf::{load_pdf, LoadedPdf, PdfMetadata, PdfPage};
use crate::rules::default_matcher;
use crate::table_detector::{TableDetector, TableDetectorConfig};
use crate::tokenizer::tokenize;

/// Default context window on each side of a span, in characters
pub const DEFAULT_CONTEXT_CHARS: usize = 60;

/// Tuning knobs for [`Extractor`]
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Page workers; 0 uses the available parallelism
    pub workers: usize,
    /// Characters of surrounding text kept on each side of a span
    pub context_chars: usize,
    /// Run table detection
    pub extract_tables: bool,
    /// Entity labels to report
    pub entity_labels: Vec<String>,
    pub tables: TableDetectorConfig,
    /// Largest accepted decoded document
    pub max_payload_bytes: usize,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            context_chars: DEFAULT_CONTEXT_CHARS,
            extract_tables: true,
            entity_labels: DEFAULT_ENTITY_LABELS.iter().map(|l| l.to_string()).collect(),
            tables: TableDetectorConfig::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// A named entity located on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntity {
    pub text: String,
    pub label: String,
    /// Character offsets into the page text
    pub start: usize,
    pub end: usize,
    /// 1-based page number
    pub page: u32,
    pub context: String,
}

/// A rule match located on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMatch {
    pub pattern: String,
    pub text: String,
    /// Token indices into the page's token sequence, end exclusive
    pub start: usize,
    pub end: usize,
    /// Character offsets of the span in the page text
    pub start_char: usize,
    pub end_char: usize,
    pub page: u32,
    pub context: String,
}

/// A table found on a page
#[derive(Debug, Clone, PartialEq)]
pub struct PageTable {
    pub page: u32,
    /// Rows of cells; `None` marks an empty cell
    pub data: Vec<Vec<Option<String>>>,
}

/// Entities and matches of one text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextAnalysis {
    pub entities: Vec<PageEntity>,
    pub matches: Vec<PageMatch>,
}

/// Everything extracted from one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentAnalysis {
    pub entities: Vec<PageEntity>,
    pub matches: Vec<PageMatch>,
    pub tables: Vec<PageTable>,
    pub page_count: usize,
    pub metadata: PdfMetadata,
}

struct PageAnalysis {
    text: TextAnalysis,
    tables: Vec<PageTable>,
}

/// Runs the full analysis over documents
pub struct Extractor {
    recognizer: Box<dyn EntityRecognizer>,
    matcher: Matcher,
    detector: TableDetector,
    pool: rayon::ThreadPool,
    options: ExtractorOptions,
}

impl Extractor {
    pub fn new(recognizer: Box<dyn EntityRecognizer>, options: ExtractorOptions) -> Result<Self> {
        let workers = if options.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            options.workers
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("vianlp-page-{i}"))
            .build()
            .context("Failed to build page worker pool")?;
        let matcher = default_matcher().context("Failed to build rule matcher")?;

        tracing::info!(
            workers,
            recognizer = recognizer.name(),
            rules = matcher.len(),
            tables = options.extract_tables,
            "Extractor ready"
        );

        Ok(Self {
            recognizer,
            matcher,
            detector: TableDetector::with_config(options.tables.clone()),
            pool,
            options,
        })
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Analyse a base64-encoded PDF
    pub fn process_base64(&self, content: &str) -> Result<DocumentAnalysis> {
        let bytes = decode_document(content, self.options.max_payload_bytes)?;
        self.process_pdf(&bytes)
    }

    /// Analyse raw PDF bytes
    pub fn process_pdf(&self, bytes: &[u8]) -> Result<DocumentAnalysis> {
        let started = Instant::now();
        let pdf = load_pdf(bytes)?;

        let pages: Vec<PageAnalysis> = self.pool.install(|| {
            pdf.pages
                .par_iter()
                .map(|page| self.analyze_page(&pdf, page))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut analysis = DocumentAnalysis {
            page_count: pdf.page_count(),
            metadata: pdf.metadata.clone(),
            ..Default::default()
        };
        for page in pages {
            analysis.entities.extend(page.text.entities);
            analysis.matches.extend(page.text.matches);
            analysis.tables.extend(page.tables);
        }

        tracing::info!(
            bytes = bytes.len(),
            pages = analysis.page_count,
            entities = analysis.entities.len(),
            matches = analysis.matches.len(),
            tables = analysis.tables.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document processed"
        );
        Ok(analysis)
    }

    fn analyze_page(&self, pdf: &LoadedPdf, page: &PdfPage) -> Result<PageAnalysis> {
        let text = self.analyze_text(page.number, &page.text)?;

        let tables = if self.options.extract_tables {
            self.page_tables(pdf, page)
        } else {
            Vec::new()
        };

        Ok(PageAnalysis { text, tables })
    }

    fn page_tables(&self, pdf: &LoadedPdf, page: &PdfPage) -> Vec<PageTable> {
        let cells = match pdf.page_cells(page.number) {
            Ok(cells) => cells,
            Err(e) => {
                tracing::debug!("Skipping tables on page {}: {:#}", page.number, e);
                return Vec::new();
            }
        };

        self.detector
            .detect(&cells)
            .into_iter()
            .map(|table| PageTable {
                page: page.number,
                data: table.rows,
            })
            .collect()
    }

    /// Entities and rule matches for one page of text
    pub fn analyze_text(&self, page: u32, text: &str) -> Result<TextAnalysis> {
        let width = self.options.context_chars;

        let spans = self
            .recognizer
            .recognize(text)
            .with_context(|| format!("Entity recognition failed on page {page}"))?;
        let entities = filter_labels(spans, &self.options.entity_labels)
            .into_iter()
            .map(|span| PageEntity {
                context: context_window(text, span.start, span.end, width),
                text: span.text,
                label: span.label,
                start: span.start,
                end: span.end,
                page,
            })
            .collect();

        let tokens = tokenize(text);
        let matches = self
            .matcher
            .find(&tokens)
            .into_iter()
            .map(|m| {
                let first = &tokens[m.start];
                let last = &tokens[m.end - 1];
                PageMatch {
                    text: text[first.start_byte..last.end_byte].to_string(),
                    context: context_window(text, first.start_char, last.end_char, width),
                    pattern: m.pattern,
                    start: m.start,
                    end: m.end,
                    start_char: first.start_char,
                    end_char: last.end_char,
                    page,
                }
            })
            .collect();

        Ok(TextAnalysis { entities, matches })
    }
}

/// Text around a character span, `width` characters each side, with
/// whitespace runs collapsed to single spaces
pub fn context_window(text: &str, start: usize, end: usize, width: usize) -> String {
    let from = start.saturating_sub(width);
    let to = end.saturating_add(width);
    char_slice(text, from, to)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
