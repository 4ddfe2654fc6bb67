//! PDF loading: pages, per-page text and document metadata

use anyhow::{Context, Result};
use encoding_rs::{UTF_16BE, WINDOWS_1252};
use lopdf::{Document, Object};

use crate::layout::{self, LayoutDocument, TextCell};

/// Row tolerance used when rebuilding text from layout cells
const FALLBACK_ROW_TOLERANCE: f32 = 5.0;

/// Document Info dictionary fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
}

/// One page of a loaded document
#[derive(Debug, Clone)]
pub struct PdfPage {
    /// 1-based page number
    pub number: u32,
    /// Extracted page text
    pub text: String,
}

/// A parsed document with its page texts
pub struct LoadedPdf {
    pub doc: Document,
    /// Copy of the document `pdf_extract` lays pages out from; `None` when it
    /// cannot parse the file
    pub layout: Option<LayoutDocument>,
    pub pages: Vec<PdfPage>,
    pub metadata: PdfMetadata,
}

impl LoadedPdf {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Positioned text cells of a page
    pub fn page_cells(&self, number: u32) -> Result<Vec<TextCell>> {
        let layout = self
            .layout
            .as_ref()
            .context("PDF could not be parsed for layout")?;
        layout::page_cells(layout, number)
    }
}

/// Parse a PDF and extract the text of every page
pub fn load_pdf(bytes: &[u8]) -> Result<LoadedPdf> {
    // lopdf opens files encrypted with an empty user password while loading
    let doc = Document::load_mem(bytes).context("Failed to parse PDF")?;
    if doc.is_encrypted() && doc.authenticate_password("").is_err() {
        tracing::warn!("PDF is encrypted with a user password; text may be unreadable");
    }

    let page_numbers: Vec<u32> = doc.get_pages().into_keys().collect();
    if page_numbers.is_empty() {
        anyhow::bail!("PDF has no pages");
    }

    let metadata = read_metadata(&doc);
    let layout = match layout::load_layout_document(bytes) {
        Ok(layout) => Some(layout),
        Err(e) => {
            tracing::debug!("No layout for PDF: {:#}", e);
            None
        }
    };
    let extracted = extract_page_texts(bytes, page_numbers.len());

    let pages = page_numbers
        .into_iter()
        .enumerate()
        .map(|(idx, number)| {
            let text = match extracted.as_ref().and_then(|texts| texts.get(idx)) {
                Some(text) if !text.trim().is_empty() => text.clone(),
                _ => layout_text(layout.as_ref(), number),
            };
            PdfPage { number, text }
        })
        .collect();

    Ok(LoadedPdf {
        doc,
        layout,
        pages,
        metadata,
    })
}

/// Per-page text via pdf_extract, `None` when it fails or disagrees on page count
fn extract_page_texts(bytes: &[u8], expected_pages: usize) -> Option<Vec<String>> {
    // pdf_extract can panic on malformed PDFs
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));

    match result {
        Ok(Ok(texts)) if texts.len() == expected_pages => {
            tracing::debug!(pages = texts.len(), "PDF text extracted with pdf_extract");
            Some(texts)
        }
        Ok(Ok(texts)) => {
            tracing::debug!(
                "pdf_extract returned {} pages, expected {}; using layout text",
                texts.len(),
                expected_pages
            );
            None
        }
        Ok(Err(e)) => {
            tracing::debug!("pdf_extract failed: {}; using layout text", e);
            None
        }
        Err(_) => {
            tracing::warn!("pdf_extract panicked (malformed PDF); using layout text");
            None
        }
    }
}

/// Page text rebuilt from layout cells, one page at a time
fn layout_text(layout: Option<&LayoutDocument>, number: u32) -> String {
    let Some(layout) = layout else {
        return String::new();
    };
    match layout::page_cells(layout, number) {
        Ok(cells) => layout::page_text(&cells, FALLBACK_ROW_TOLERANCE),
        Err(e) => {
            tracing::debug!("No text for page {}: {:#}", number, e);
            String::new()
        }
    }
}

/// Read title/author/subject/keywords from the Info dictionary
fn read_metadata(doc: &Document) -> PdfMetadata {
    let info = doc.trailer.get(b"Info").ok().and_then(|obj| match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    });

    let Some(Object::Dictionary(info_dict)) = info else {
        tracing::debug!("No Info dictionary in PDF");
        return PdfMetadata::default();
    };

    let get_string = |key: &[u8]| -> Option<String> {
        let value = match info_dict.get(key).ok()? {
            Object::String(bytes, _) => info_string(bytes),
            _ => return None,
        };
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };

    PdfMetadata {
        title: get_string(b"Title"),
        author: get_string(b"Author"),
        subject: get_string(b"Subject"),
        keywords: get_string(b"Keywords"),
    }
}

/// Info strings are UTF-16BE with a BOM, or a single-byte encoding; some
/// producers write plain UTF-8
fn info_string(bytes: &[u8]) -> String {
    if !bytes.starts_with(&[0xFE, 0xFF]) {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return s.chars().filter(|c| !c.is_control()).collect();
        }
    }
    decode_pdf_string(bytes)
}

/// Decode a PDF text string: UTF-16BE with a byte order mark, two-byte strings
/// whose high bytes are all zero, otherwise Windows-1252
fn decode_pdf_string(bytes: &[u8]) -> String {
    let decoded = if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        UTF_16BE.decode_without_bom_handling(rest).0.into_owned()
    } else if bytes.len() >= 2
        && bytes.len() % 2 == 0
        && bytes.iter().step_by(2).all(|&b| b == 0)
    {
        UTF_16BE.decode_without_bom_handling(bytes).0.into_owned()
    } else {
        WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()
    };

    decoded.chars().filter(|c| !c.is_control()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_detector::TableDetector;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, EncryptionState, EncryptionVersion, Permissions, Stream, StringFormat};

    /// Text runs `(text, x, y)` shown with font resource `font`
    fn text_ops(font: &str, runs: &[(&str, i64, i64)]) -> Vec<Operation> {
        let mut operations = Vec::new();
        for (text, x, y) in runs {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec![font.into(), 12.into()]));
            operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
            operations.push(Operation::new("ET", vec![]));
        }
        operations
    }

    fn build_doc(pages: Vec<Vec<Operation>>, info: Option<lopdf::Dictionary>) -> Document {
        let mut doc = Document::with_version("1.5");
        doc.trailer.set(
            "ID",
            Object::Array(vec![
                Object::String(b"vianlp-test-id-1".to_vec(), StringFormat::Literal),
                Object::String(b"vianlp-test-id-2".to_vec(), StringFormat::Literal),
            ]),
        );
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for operations in pages {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().unwrap(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        if let Some(info) = info {
            let info_id = doc.add_object(info);
            doc.trailer.set("Info", info_id);
        }
        doc
    }

    fn save(mut doc: Document) -> Vec<u8> {
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn build_pdf(pages: &[&str], info: Option<lopdf::Dictionary>) -> Vec<u8> {
        let pages = pages
            .iter()
            .map(|text| text_ops("F1", &[(*text, 72, 700)]))
            .collect();
        save(build_doc(pages, info))
    }

    fn grid_page() -> Vec<Operation> {
        text_ops(
            "F1",
            &[
                ("Comune", 72, 600),
                ("Provincia", 200, 600),
                ("Turbine", 330, 600),
                ("Melfi", 72, 580),
                ("Potenza", 200, 580),
                ("8", 330, 580),
                ("Lavello", 72, 560),
                ("Potenza", 200, 560),
                ("4", 330, 560),
            ],
        )
    }

    #[test]
    fn test_load_pages_in_order() {
        let bytes = build_pdf(&["Relazione tecnica", "Comune di Melfi"], None);
        let pdf = load_pdf(&bytes).unwrap();
        assert_eq!(pdf.page_count(), 2);
        assert_eq!(pdf.pages[0].number, 1);
        assert_eq!(pdf.pages[1].number, 2);
        assert!(pdf.pages[0].text.contains("Relazione tecnica"));
        assert!(pdf.pages[1].text.contains("Comune di Melfi"));
    }

    #[test]
    fn test_page_cells() {
        let pdf = load_pdf(&save(build_doc(vec![grid_page()], None))).unwrap();
        let cells = pdf.page_cells(1).unwrap();
        assert_eq!(cells.len(), 9);
        assert_eq!(cells[0].text, "Comune");
        assert_eq!(cells[8].text, "4");
    }

    #[test]
    fn test_metadata() {
        let mut title = vec![0xFE, 0xFF];
        for unit in "Parco eolico Città".encode_utf16() {
            title.extend_from_slice(&unit.to_be_bytes());
        }
        let info = dictionary! {
            "Title" => Object::String(title, StringFormat::Hexadecimal),
            "Author" => Object::string_literal("Studio Rossi"),
            "Subject" => Object::string_literal("   "),
        };
        let pdf = load_pdf(&build_pdf(&["testo"], Some(info))).unwrap();
        assert_eq!(pdf.metadata.title.as_deref(), Some("Parco eolico Città"));
        assert_eq!(pdf.metadata.author.as_deref(), Some("Studio Rossi"));
        assert_eq!(pdf.metadata.subject, None);
        assert_eq!(pdf.metadata.keywords, None);
    }

    #[test]
    fn test_no_info_dictionary() {
        let pdf = load_pdf(&build_pdf(&["testo"], None)).unwrap();
        assert_eq!(pdf.metadata, PdfMetadata::default());
    }

    #[test]
    fn test_empty_password_encryption() {
        let info = dictionary! { "Title" => Object::string_literal("Relazione tecnica") };
        let mut doc = build_doc(vec![grid_page()], Some(info));
        let version = EncryptionVersion::V2 {
            document: &doc,
            owner_password: "",
            user_password: "",
            key_length: 128,
            permissions: Permissions::all(),
        };
        let state = EncryptionState::try_from(version).unwrap();
        doc.encrypt(&state).unwrap();
        let bytes = save(doc);

        let pdf = load_pdf(&bytes).unwrap();
        assert_eq!(pdf.metadata.title.as_deref(), Some("Relazione tecnica"));
        assert!(pdf.pages[0].text.contains("Comune"));

        let cells = pdf.page_cells(1).unwrap();
        let tables = TableDetector::default().detect(&cells);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 3);
        assert_eq!(
            tables[0].rows[1],
            vec![
                Some("Melfi".to_string()),
                Some("Potenza".to_string()),
                Some("8".to_string())
            ]
        );
    }

    #[test]
    fn test_text_falls_back_to_layout() {
        // Page 1 selects a font the page resources lack, which pdf_extract
        // cannot render; the whole-document pass fails with it
        let broken = text_ops("F9", &[("Pagina rotta", 72, 700)]);
        let intact = text_ops("F1", &[("Comune di Melfi", 72, 700)]);
        let bytes = save(build_doc(vec![broken, intact], None));

        assert!(extract_page_texts(&bytes, 2).is_none());

        let pdf = load_pdf(&bytes).unwrap();
        assert_eq!(pdf.page_count(), 2);
        assert_eq!(pdf.pages[0].text, "");
        assert_eq!(pdf.pages[1].text, "Comune di Melfi");
    }

    #[test]
    fn test_zero_pages_is_an_error() {
        let err = load_pdf(&save(build_doc(Vec::new(), None))).err().unwrap();
        assert_eq!(err.to_string(), "PDF has no pages");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(load_pdf(b"%PDF-1.4\nthis is not really a pdf").is_err());
    }

    #[test]
    fn test_info_string_encodings() {
        assert_eq!(info_string("perché".as_bytes()), "perché");
        assert_eq!(info_string(&[0x70, 0x65, 0x72, 0x63, 0x68, 0xE9]), "perché");
    }

    #[test]
    fn test_decode_pdf_string_variants() {
        assert_eq!(decode_pdf_string(b"Comune"), "Comune");
        // Windows-1252 degree sign
        assert_eq!(decode_pdf_string(b"45\xB030'"), "45°30'");
        // UTF-16BE with BOM
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x43, 0x00, 0xE0]), "Cà");
        // UTF-16BE without BOM
        assert_eq!(decode_pdf_string(&[0x00, 0x4F, 0x00, 0x4B]), "OK");
    }
}
