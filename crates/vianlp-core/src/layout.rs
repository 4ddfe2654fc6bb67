//! Positioned text cells from PDF pages
//!
//! Table detection needs to know where text sits on the page, which plain text
//! extraction throws away. Pages are rendered through `pdf_extract`'s output
//! device, which resolves font encodings, `ToUnicode` maps and glyph widths.
//! [`CellCollector`] groups the characters it emits into [`TextCell`]s: a run
//! of characters on one baseline without a wide horizontal gap.

use anyhow::{Context, Result};
use pdf_extract::{MediaBox, OutputDev, OutputError, Transform};

/// The document type `pdf_extract` renders from
pub type LayoutDocument = pdf_extract::Document;

/// Horizontal gap (ems) that splits a line into separate cells
const CELL_GAP_EM: f64 = 1.0;

/// Horizontal gap (ems) read as a space between words
const WORD_GAP_EM: f64 = 0.1;

/// Baseline shift (ems) that starts a new line
const LINE_SHIFT_EM: f64 = 0.5;

/// A text cell extracted from a PDF with its bounding box
///
/// Coordinates use a top-left origin: `y` grows downwards, like reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct TextCell {
    /// Cell text content
    pub text: String,
    /// Left coordinate (points)
    pub x: f32,
    /// Top coordinate (points)
    pub y: f32,
    /// Width (points)
    pub width: f32,
    /// Height (points)
    pub height: f32,
}

impl TextCell {
    /// Center X coordinate
    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    /// Center Y coordinate
    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    /// Right edge
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// A cell still receiving characters, in PDF user space
struct OpenCell {
    text: String,
    left: f64,
    right: f64,
    baseline: f64,
    size: f64,
}

/// `OutputDev` that turns rendered characters into text cells
#[derive(Default)]
pub struct CellCollector {
    page_top: f64,
    current: Option<OpenCell>,
    cells: Vec<TextCell>,
}

impl CellCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cells collected so far, sorted in reading order
    pub fn into_cells(mut self) -> Vec<TextCell> {
        self.finish_cell();
        sort_reading_order(&mut self.cells);
        self.cells
    }

    fn finish_cell(&mut self) {
        let Some(cell) = self.current.take() else {
            return;
        };
        let text = cell.text.trim();
        if text.is_empty() {
            return;
        }
        self.cells.push(TextCell {
            text: text.to_string(),
            x: cell.left as f32,
            y: (self.page_top - cell.baseline - cell.size) as f32,
            width: (cell.right - cell.left).max(0.0) as f32,
            height: cell.size as f32,
        });
    }
}

impl OutputDev for CellCollector {
    fn begin_page(
        &mut self,
        _page_num: u32,
        media_box: &MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), OutputError> {
        self.finish_cell();
        self.page_top = media_box.ury;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), OutputError> {
        self.finish_cell();
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &Transform,
        width: f64,
        _spacing: f64,
        font_size: f64,
        ch: &str,
    ) -> Result<(), OutputError> {
        let size = rendered_size(font_size, trm.m21.hypot(trm.m22));
        let advance = width * rendered_size(font_size, trm.m11.hypot(trm.m12));
        let (x, baseline) = (trm.m31, trm.m32);

        if let Some(cell) = &self.current {
            let same_line = (baseline - cell.baseline).abs() <= LINE_SHIFT_EM * cell.size;
            let gap = x - cell.right;
            if !same_line || gap.abs() > CELL_GAP_EM * cell.size {
                self.finish_cell();
            }
        }

        match self.current.as_mut() {
            Some(cell) => {
                if x - cell.right > WORD_GAP_EM * cell.size && !cell.text.ends_with(' ') {
                    cell.text.push(' ');
                }
                cell.text.push_str(ch);
                cell.right = cell.right.max(x + advance);
            }
            None if ch.trim().is_empty() => {}
            None => {
                self.current = Some(OpenCell {
                    text: ch.to_string(),
                    left: x,
                    right: x + advance,
                    baseline,
                    size,
                });
            }
        }
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

fn rendered_size(font_size: f64, scale: f64) -> f64 {
    let size = (font_size * scale).abs();
    if size.is_finite() && size > 0.0 {
        size
    } else if font_size.is_finite() {
        font_size.abs()
    } else {
        0.0
    }
}

/// Parse a PDF for layout, opening it with the empty password when encrypted
pub fn load_layout_document(bytes: &[u8]) -> Result<LayoutDocument> {
    let mut doc = LayoutDocument::load_mem(bytes)
        .map_err(|e| anyhow::anyhow!("Failed to parse PDF for layout: {e}"))?;
    if doc.is_encrypted() {
        if let Err(e) = doc.decrypt("") {
            tracing::warn!("Layout pass cannot decrypt PDF with an empty password: {}", e);
        }
    }
    Ok(doc)
}

/// Text cells of one page (1-based number), sorted in reading order
pub fn page_cells(doc: &LayoutDocument, page_number: u32) -> Result<Vec<TextCell>> {
    let mut collector = CellCollector::new();

    // pdf_extract panics on some malformed content streams
    let rendered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::output_doc_page(doc, &mut collector, page_number)
    }));
    match rendered {
        Ok(Ok(())) => Ok(collector.into_cells()),
        Ok(Err(e)) => Err(anyhow::anyhow!("{e}"))
            .with_context(|| format!("Failed to lay out page {page_number}")),
        Err(_) => anyhow::bail!("pdf_extract panicked laying out page {page_number}"),
    }
}

/// Cluster cells into rows based on Y coordinate alignment
///
/// Rows come back top to bottom with their cells left to right.
pub fn group_rows(cells: &[TextCell], row_tolerance: f32) -> Vec<Vec<&TextCell>> {
    let mut rows: Vec<Vec<&TextCell>> = Vec::new();

    for cell in cells {
        let found_row = rows.iter().position(|row| {
            row.first()
                .is_some_and(|first| (cell.center_y() - first.center_y()).abs() <= row_tolerance)
        });

        match found_row {
            Some(row_idx) => rows[row_idx].push(cell),
            None => rows.push(vec![cell]),
        }
    }

    for row in &mut rows {
        row.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
    }

    rows.sort_by(|a, b| {
        let ay = a.first().map(|c| c.y).unwrap_or(0.0);
        let by = b.first().map(|c| c.y).unwrap_or(0.0);
        ay.partial_cmp(&by).unwrap_or(std::cmp::Ordering::Equal)
    });

    rows
}

/// Rebuild plain page text from cells: one line per row, cells space-joined
pub fn page_text(cells: &[TextCell], row_tolerance: f32) -> String {
    group_rows(cells, row_tolerance)
        .iter()
        .map(|row| {
            row.iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn sort_reading_order(cells: &mut [TextCell]) {
    cells.sort_by(|a, b| {
        let y_cmp = a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal);
        if y_cmp == std::cmp::Ordering::Equal {
            a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            y_cmp
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    const PAGE: MediaBox = MediaBox {
        llx: 0.0,
        lly: 0.0,
        urx: 595.0,
        ury: 842.0,
    };

    /// Feed `text` to the collector as glyphs of `width` ems starting at (x, baseline)
    fn emit(out: &mut CellCollector, text: &str, x: f64, baseline: f64, size: f64, width: f64) {
        let mut pen = x;
        for ch in text.chars() {
            let trm = Transform::row_major(1.0, 0.0, 0.0, 1.0, pen, baseline);
            out.output_character(&trm, width, 0.0, size, &ch.to_string())
                .unwrap();
            pen += width * size;
        }
    }

    fn collect(runs: &[(&str, f64, f64)]) -> Vec<TextCell> {
        let mut out = CellCollector::new();
        out.begin_page(1, &PAGE, None).unwrap();
        for (text, x, baseline) in runs {
            emit(&mut out, text, *x, *baseline, 10.0, 0.5);
        }
        out.end_page().unwrap();
        out.into_cells()
    }

    #[test]
    fn test_single_run_position() {
        let cells = collect(&[("Comune", 72.0, 700.0)]);
        assert_eq!(cells.len(), 1);
        let cell = &cells[0];
        assert_eq!(cell.text, "Comune");
        assert!((cell.x - 72.0).abs() < 1e-3);
        assert!((cell.height - 10.0).abs() < 1e-3);
        // 6 glyphs at half an em each
        assert!((cell.width - 30.0).abs() < 1e-3);
        assert!((cell.y - 132.0).abs() < 1e-3);
    }

    #[test]
    fn test_reading_order() {
        let cells = collect(&[("right", 300.0, 500.0), ("top", 72.0, 700.0), ("left", 72.0, 500.0)]);
        let texts: Vec<&str> = cells.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["top", "left", "right"]);
    }

    #[test]
    fn test_small_gap_is_a_space_wide_gap_a_new_cell() {
        // "Parco" ends at 85; 3pt gap then a 60pt gap
        let cells = collect(&[("Parco", 60.0, 700.0), ("eolico", 88.0, 700.0), ("Melfi", 175.0, 700.0)]);
        let texts: Vec<&str> = cells.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Parco eolico", "Melfi"]);
    }

    #[test]
    fn test_new_baseline_starts_a_cell() {
        let cells = collect(&[("first", 50.0, 600.0), ("second", 50.0, 586.0)]);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].text, "first");
        assert_eq!(cells[1].text, "second");
        assert!((cells[1].y - cells[0].y - 14.0).abs() < 1e-3);
    }

    #[test]
    fn test_scaled_matrix_sets_size() {
        let mut out = CellCollector::new();
        out.begin_page(1, &PAGE, None).unwrap();
        let trm = Transform::row_major(2.0, 0.0, 0.0, 2.0, 120.0, 400.0);
        out.output_character(&trm, 0.5, 0.0, 10.0, "W").unwrap();
        let cells = out.into_cells();
        assert_eq!(cells.len(), 1);
        assert!((cells[0].height - 20.0).abs() < 1e-3);
        assert!((cells[0].width - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_whitespace_runs_dropped() {
        assert!(collect(&[("   ", 10.0, 10.0)]).is_empty());
    }

    #[test]
    fn test_page_text_rows() {
        let cells = collect(&[
            ("Comune", 72.0, 700.0),
            ("Potenza", 200.0, 700.0),
            ("Foggia", 72.0, 680.0),
            ("24", 200.0, 680.0),
        ]);
        assert_eq!(page_text(&cells, 5.0), "Comune Potenza\nFoggia 24");
    }

    /// One page whose font maps bytes 0x01..=0x1A to A..=Z through a ToUnicode CMap
    fn to_unicode_pdf(rows: &[[&str; 3]]) -> Vec<u8> {
        let cmap = b"/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
/CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
1 begincodespacerange\n<00> <FF>\nendcodespacerange\n\
1 beginbfrange\n<01> <1A> <0041>\nendbfrange\n\
endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n";

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let cmap_id = doc.add_object(Stream::new(dictionary! {}, cmap.to_vec()));
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "FirstChar" => 1,
            "LastChar" => 26,
            "Widths" => (0..26).map(|_| Object::Integer(600)).collect::<Vec<_>>(),
            "ToUnicode" => cmap_id,
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut operations = Vec::new();
        for (r, row) in rows.iter().enumerate() {
            for (c, word) in row.iter().enumerate() {
                let coded: Vec<u8> = word.bytes().map(|b| b - b'A' + 1).collect();
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
                operations.push(Operation::new(
                    "Td",
                    vec![(72 + 150 * c as i64).into(), (600 - 20 * r as i64).into()],
                ));
                operations.push(Operation::new("Tj", vec![Object::string_literal(coded)]));
                operations.push(Operation::new("ET", vec![]));
            }
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_page_cells_decode_to_unicode_maps() {
        let bytes = to_unicode_pdf(&[
            ["COMUNE", "PROVINCIA", "TURBINE"],
            ["MELFI", "POTENZA", "OTTO"],
            ["LAVELLO", "POTENZA", "QUATTRO"],
        ]);
        let doc = load_layout_document(&bytes).unwrap();
        let cells = page_cells(&doc, 1).unwrap();

        let texts: Vec<&str> = cells.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "COMUNE", "PROVINCIA", "TURBINE", "MELFI", "POTENZA", "OTTO", "LAVELLO",
                "POTENZA", "QUATTRO"
            ]
        );
        // 842 - 600 - 10
        assert!((cells[0].y - 232.0).abs() < 1e-3);
        assert!((cells[1].x - 222.0).abs() < 1e-3);
        // Widths come from the font: 6 glyphs at 0.6 em
        assert!((cells[0].width - 36.0).abs() < 1e-3);
    }

    #[test]
    fn test_page_cells_unknown_page() {
        let bytes = to_unicode_pdf(&[["A", "B", "C"]]);
        let doc = load_layout_document(&bytes).unwrap();
        assert!(page_cells(&doc, 2).is_err());
    }
}
