use crate::error::IngestError;
use crate::fonts::{page_font_decoders, FontDecoder};
use crate::models::{ContentType, PageUnit, TableUnit, UnitMetadata};
use crate::tables::{analyze_page, tables_to_markdown, TextRun};
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub pages: Vec<PageUnit>,
    pub tables: Vec<TableUnit>,
}

pub trait PdfExtractor {
    fn name(&self) -> &'static str;
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, IngestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionStrategy {
    #[default]
    Simple,
    LayoutAware,
}

impl ExtractionStrategy {
    pub fn extractor(self) -> Box<dyn PdfExtractor> {
        match self {
            ExtractionStrategy::Simple => Box::new(SimpleExtractor),
            ExtractionStrategy::LayoutAware => Box::new(LayoutAwareExtractor),
        }
    }
}

impl FromStr for ExtractionStrategy {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ExtractionStrategy::Simple),
            "layout" | "layout-aware" => Ok(ExtractionStrategy::LayoutAware),
            other => Err(IngestError::Configuration(format!(
                "unknown extraction strategy '{other}', expected simple or layout-aware"
            ))),
        }
    }
}

fn load_document(path: &Path) -> Result<Document, IngestError> {
    Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))
}

fn source_of(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleExtractor;

impl PdfExtractor for SimpleExtractor {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn extract(&self, path: &Path) -> Result<ExtractedDocument, IngestError> {
        let document = load_document(path)?;
        let source = source_of(path);

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(PageUnit {
                content: text,
                metadata: UnitMetadata::new(page_no - 1, source.clone(), ContentType::Text),
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        Ok(ExtractedDocument {
            pages,
            tables: Vec::new(),
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LayoutAwareExtractor;

impl PdfExtractor for LayoutAwareExtractor {
    fn name(&self) -> &'static str {
        "layout-aware"
    }

    fn extract(&self, path: &Path) -> Result<ExtractedDocument, IngestError> {
        let document = load_document(path)?;
        let source = source_of(path);
        let mut extracted = ExtractedDocument::default();

        for (page_no, page_id) in document.get_pages() {
            let runs = positioned_runs(&document, page_id)?;
            let layout = analyze_page(&runs);
            let page = page_no - 1;

            if !layout.text.trim().is_empty() {
                extracted.pages.push(PageUnit {
                    content: layout.text,
                    metadata: UnitMetadata::new(page, source.clone(), ContentType::Text),
                });
            }

            if let Some(markdown) = tables_to_markdown(&layout.tables) {
                debug!(page_label = page + 1, tables = layout.tables.len(), "tables detected");
                extracted.tables.push(TableUnit {
                    content: markdown,
                    metadata: UnitMetadata::new(page, source.clone(), ContentType::Table),
                });
            }
        }

        info!(
            source = %source,
            pages = extracted.pages.len(),
            tables = extracted.tables.len(),
            "extracted text pages and tables"
        );
        Ok(extracted)
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    line_x: f32,
    line_y: f32,
    x: f32,
    y: f32,
    leading: f32,
    font_size: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            line_x: 0.0,
            line_y: 0.0,
            x: 0.0,
            y: 0.0,
            leading: 0.0,
            font_size: 12.0,
        }
    }
}

impl TextState {
    fn move_line(&mut self, dx: f32, dy: f32) {
        self.line_x += dx;
        self.line_y += dy;
        self.x = self.line_x;
        self.y = self.line_y;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.move_line(0.0, -leading);
    }

    fn show(&mut self, text: String, runs: &mut Vec<TextRun>) {
        if text.trim().is_empty() {
            return;
        }
        let width = text.chars().count() as f32 * self.font_size * 0.5;
        runs.push(TextRun {
            x: self.x,
            y: self.y,
            font_size: self.font_size,
            text,
        });
        self.x += width;
    }
}

fn number(object: Option<&Object>) -> Option<f32> {
    match object? {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// Kerning adjustments in a `TJ` array wider than this are read as spaces.
const TJ_SPACE_THRESHOLD: f32 = 250.0;

fn show_array(items: &[Object], font: &FontDecoder) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&font.decode(bytes)),
            other => {
                if number(Some(other)).is_some_and(|adjust| -adjust >= TJ_SPACE_THRESHOLD) {
                    text.push(' ');
                }
            }
        }
    }
    text
}

/// Walks the page content stream and records where each string is drawn.
/// The current transformation matrix is not applied.
fn positioned_runs(document: &Document, page_id: ObjectId) -> Result<Vec<TextRun>, IngestError> {
    let content = document
        .get_page_content(page_id)
        .map_err(|error| IngestError::PdfParse(error.to_string()))?;
    let operations = Content::decode(&content)
        .map_err(|error| IngestError::PdfParse(error.to_string()))?
        .operations;

    let fonts = page_font_decoders(document, page_id);
    let fallback = FontDecoder::default();
    let mut font = &fallback;
    let mut runs = Vec::new();
    let mut state = TextState::default();

    for op in operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                let font_size = state.font_size;
                let leading = state.leading;
                state = TextState {
                    font_size,
                    leading,
                    ..TextState::default()
                };
            }
            "Tf" => {
                if let Some(name) = operands.first().and_then(|name| name.as_name().ok()) {
                    font = fonts.get(name).unwrap_or(&fallback);
                }
                if let Some(size) = number(operands.get(1)) {
                    state.font_size = size.abs();
                }
            }
            "TL" => {
                if let Some(leading) = number(operands.first()) {
                    state.leading = leading;
                }
            }
            "Tm" => {
                if let (Some(x), Some(y)) = (number(operands.get(4)), number(operands.get(5))) {
                    state.line_x = x;
                    state.line_y = y;
                    state.x = x;
                    state.y = y;
                }
            }
            "Td" | "TD" => {
                if let (Some(dx), Some(dy)) = (number(operands.first()), number(operands.get(1))) {
                    if op.operator == "TD" {
                        state.leading = -dy;
                    }
                    state.move_line(dx, dy);
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    state.show(font.decode(bytes), &mut runs);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    state.show(show_array(items, font), &mut runs);
                }
            }
            "'" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    state.show(font.decode(bytes), &mut runs);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    state.show(font.decode(bytes), &mut runs);
                }
            }
            _ => {}
        }
    }

    Ok(runs)
}

/// `poker.pdf` + page 2 -> `poker_page_2_table.txt`. Only an exact `.pdf`
/// suffix is removed.
pub fn table_artifact_name(file_name: &str, page_label: u32) -> String {
    let stem = file_name.strip_suffix(".pdf").unwrap_or(file_name);
    format!("{stem}_page_{page_label}_table.txt")
}

pub fn write_table_artifact(
    tables_dir: &Path,
    file_name: &str,
    page_label: u32,
    markdown: &str,
) -> std::io::Result<PathBuf> {
    fs::create_dir_all(tables_dir)?;
    let path = tables_dir.join(table_artifact_name(file_name, page_label));
    fs::write(&path, markdown)?;
    Ok(path)
}


#[cfg(test)]
mod tests {
    use super::test_pdf::{
        write_identity_pdf, write_pdf, write_sample_with_table, write_win_ansi_pdf,
    };
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn strategy_selector_parses_known_names() {
        assert_eq!(
            "layout-aware".parse::<ExtractionStrategy>().ok(),
            Some(ExtractionStrategy::LayoutAware)
        );
        assert_eq!(
            "Simple".parse::<ExtractionStrategy>().ok(),
            Some(ExtractionStrategy::Simple)
        );
        assert!("pdfminer".parse::<ExtractionStrategy>().is_err());
    }

    #[test]
    fn artifact_name_strips_exact_suffix_only() {
        assert_eq!(table_artifact_name("perf.pdf", 3), "perf_page_3_table.txt");
        assert_eq!(table_artifact_name("notes", 1), "notes_page_1_table.txt");
        assert_eq!(table_artifact_name("odd.PDF", 1), "odd.PDF_page_1_table.txt");
    }

    #[test]
    fn layout_text_follows_win_ansi_font_encoding() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("quotes.pdf");
        write_win_ansi_pdf(
            &path,
            &[(72, 750, &b"Don\x92t slowplay \x93nuts\x94 \x96 raise."[..])],
        )?;

        let extracted = LayoutAwareExtractor.extract(&path)?;

        assert_eq!(extracted.pages.len(), 1);
        assert!(extracted.pages[0]
            .content
            .contains("Don\u{2019}t slowplay \u{201c}nuts\u{201d} \u{2013} raise."));
        Ok(())
    }

    #[test]
    fn layout_text_maps_identity_fonts_through_to_unicode() -> Result<(), Box<dyn std::error::Error>> {
        let cmap = b"begincmap
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
1 beginbfchar
<0003> <0020>
endbfchar
1 beginbfrange
<0024> <003D> <0041>
endbfrange
endcmap";
        let dir = tempdir()?;
        let path = dir.path().join("cid.pdf");
        // "FOLD NOW" as glyph ids.
        let glyphs: &[u8] = &[
            0x00, 0x29, 0x00, 0x32, 0x00, 0x2F, 0x00, 0x27, 0x00, 0x03, 0x00, 0x31, 0x00, 0x32,
            0x00, 0x3A,
        ];
        write_identity_pdf(&path, cmap, &[(72, 750, glyphs)])?;

        let extracted = LayoutAwareExtractor.extract(&path)?;

        assert_eq!(extracted.pages.len(), 1);
        assert!(extracted.pages[0].content.contains("FOLD NOW"));
        Ok(())
    }

    #[test]
    fn layout_aware_replaces_table_with_placeholder() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("sample.pdf");
        write_sample_with_table(&path)?;

        let extracted = LayoutAwareExtractor.extract(&path)?;

        assert_eq!(extracted.pages.len(), 3);
        assert_eq!(extracted.tables.len(), 1);

        let page_two = &extracted.pages[1];
        assert_eq!(page_two.metadata.page_label, 2);
        assert_eq!(page_two.metadata.content_type, ContentType::Text);
        assert!(page_two.content.contains("[TABLE 1]"));
        assert!(!page_two.content.contains("Equity"));
        assert!(!page_two.content.contains("85%"));
        assert!(page_two.content.contains("Raise these hands"));

        let table = &extracted.tables[0];
        assert_eq!(table.metadata.page, 1);
        assert_eq!(table.metadata.content_type, ContentType::Table);
        assert_eq!(
            table.content,
            "| Hand | Equity |\n| --- | --- |\n| AA | 85% |\n| KK | 82% |"
        );
        Ok(())
    }

    #[test]
    fn simple_extractor_emits_one_unit_per_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("plain.pdf");
        write_pdf(
            &path,
            &[
                vec![(72, 750, "First page")],
                vec![(72, 750, "Second page")],
            ],
        )?;

        let extracted = SimpleExtractor.extract(&path)?;

        assert_eq!(extracted.pages.len(), 2);
        assert!(extracted.tables.is_empty());
        assert_eq!(extracted.pages[0].metadata.page, 0);
        assert_eq!(extracted.pages[1].metadata.page_label, 2);
        assert!(extracted.pages[1].content.contains("Second"));
        Ok(())
    }

    #[test]
    fn corrupt_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let error = LayoutAwareExtractor.extract(&path).unwrap_err();
        assert!(matches!(error, IngestError::PdfParse(_)));
        Ok(())
    }
}
