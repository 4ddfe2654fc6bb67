//! vianlp-core: entity, pattern and table extraction for Italian PDFs
//!
//! This crate provides:
//! - Base64 payload decoding and PDF loading
//! - Positioned text cells from rendered PDF pages
//! - Heuristic table detection
//! - A rule-based tokenizer and token pattern matcher with the domain rule table
//! - Named entity recognition with a candle BERT token classifier
//! - The per-document pipeline that runs all of the above on a worker pool

pub mod layout;
pub mod matcher;
pub mod ner;
pub mod ner_bert;
pub mod payload;
pub mod pdf;
pub mod pipeline;
pub mod rules;
pub mod table_detector;
pub mod tokenizer;

// Re-exports
pub use layout::{
    group_rows, load_layout_document, page_cells, page_text, CellCollector, LayoutDocument, TextCell,
};
pub use matcher::{Attr, Matcher, PatternMatch, Predicate, Quantifier, TokenPattern, TokenSpec};
pub use ner::{
    decode_bio, filter_labels, DisabledRecognizer, EntityRecognizer, EntitySpan, TaggedPiece,
    DEFAULT_ENTITY_LABELS,
};
pub use ner_bert::{BertEntityRecognizer, DEFAULT_NER_MODEL};
pub use payload::{decode_document, is_pdf, DEFAULT_MAX_PAYLOAD_BYTES};
pub use pdf::{load_pdf, LoadedPdf, PdfMetadata, PdfPage};
pub use pipeline::{
    context_window, DocumentAnalysis, Extractor, ExtractorOptions, PageEntity, PageMatch,
    PageTable, TextAnalysis, DEFAULT_CONTEXT_CHARS,
};
pub use rules::default_matcher;
pub use table_detector::{DetectedTable, TableDetector, TableDetectorConfig};
pub use tokenizer::{tokenize, Token};

/// Create the compute device for model inference
pub fn make_device() -> candle_core::Device {
    #[cfg(feature = "metal")]
    {
        candle_core::Device::new_metal(0).unwrap_or(candle_core::Device::Cpu)
    }
    #[cfg(all(feature = "cuda", not(feature = "metal")))]
    {
        candle_core::Device::new_cuda(0).unwrap_or(candle_core::Device::Cpu)
    }
    #[cfg(not(any(feature = "metal", feature = "cuda")))]
    {
        candle_core::Device::Cpu
    }
}
