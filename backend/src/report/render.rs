use printpdf::image_crate::{self, DynamicImage};
use printpdf::{
    BuiltinFont, Color, Image, ImageTransform, IndirectFontRef, Line, Mm, PdfDocument,
    PdfDocumentReference, PdfLayerReference, Point, Rgb,
};

use super::content::{IMAGE_UNAVAILABLE_NOTE, Section};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const IMAGE_MAX_WIDTH: f32 = 120.0;
const IMAGE_MAX_HEIGHT: f32 = 90.0;
const THUMBNAIL_PX: u32 = 1024;
const PT_TO_MM: f32 = 0.3528;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("PDF font error: {0}")]
    Font(String),
    #[error("PDF serialization error: {0}")]
    Output(String),
}

/// Either a decoded picture ready to embed or the inline note that replaces it.
pub enum ImageBlock {
    Embedded(DynamicImage),
    Note(String),
}

impl ImageBlock {
    pub fn from_bytes(bytes: Option<&[u8]>) -> Self {
        let Some(bytes) = bytes else {
            return ImageBlock::Note(IMAGE_UNAVAILABLE_NOTE.to_string());
        };
        match image_crate::load_from_memory(bytes) {
            // Alpha channels render black in some viewers.
            Ok(decoded) => ImageBlock::Embedded(DynamicImage::ImageRgb8(
                decoded.thumbnail(THUMBNAIL_PX, THUMBNAIL_PX).to_rgb8(),
            )),
            Err(e) => {
                log::warn!("Could not decode report image: {}", e);
                ImageBlock::Note(IMAGE_UNAVAILABLE_NOTE.to_string())
            }
        }
    }
}

/// Central European letters missing from WinAnsi, folded to their base letter.
const LATIN_FOLDS: &[(char, char)] = &[
    ('ą', 'a'), ('ă', 'a'), ('ā', 'a'), ('Ą', 'A'), ('Ă', 'A'), ('Ā', 'A'),
    ('ć', 'c'), ('č', 'c'), ('Ć', 'C'), ('Č', 'C'),
    ('ď', 'd'), ('đ', 'd'), ('Ď', 'D'), ('Đ', 'D'),
    ('ę', 'e'), ('ě', 'e'), ('ē', 'e'), ('ė', 'e'), ('Ę', 'E'), ('Ě', 'E'), ('Ē', 'E'), ('Ė', 'E'),
    ('ğ', 'g'), ('Ğ', 'G'),
    ('ı', 'i'), ('ī', 'i'), ('į', 'i'), ('İ', 'I'), ('Ī', 'I'), ('Į', 'I'),
    ('ł', 'l'), ('ľ', 'l'), ('ĺ', 'l'), ('Ł', 'L'), ('Ľ', 'L'), ('Ĺ', 'L'),
    ('ń', 'n'), ('ň', 'n'), ('Ń', 'N'), ('Ň', 'N'),
    ('ő', 'o'), ('ō', 'o'), ('Ő', 'O'), ('Ō', 'O'),
    ('ř', 'r'), ('ŕ', 'r'), ('Ř', 'R'), ('Ŕ', 'R'),
    ('ś', 's'), ('ş', 's'), ('ș', 's'), ('Ś', 'S'), ('Ş', 'S'), ('Ș', 'S'),
    ('ť', 't'), ('ţ', 't'), ('ț', 't'), ('Ť', 'T'), ('Ţ', 'T'), ('Ț', 'T'),
    ('ů', 'u'), ('ű', 'u'), ('ū', 'u'), ('ų', 'u'), ('Ů', 'U'), ('Ű', 'U'), ('Ū', 'U'), ('Ų', 'U'),
    ('ź', 'z'), ('ż', 'z'), ('Ź', 'Z'), ('Ż', 'Z'),
];

fn win_ansi(c: char) -> bool {
    let mut buf = [0u8; 4];
    !printpdf::lopdf::Document::encode_text(Some("WinAnsiEncoding"), c.encode_utf8(&mut buf))
        .is_empty()
}

/// Built-in fonts encode text as WinAnsi and silently drop anything else.
fn pdf_text(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_control() {
                ' '
            } else if win_ansi(c) {
                c
            } else {
                LATIN_FOLDS
                    .iter()
                    .find(|(from, _)| *from == c)
                    .map_or('?', |(_, to)| *to)
            }
        })
        .collect()
}

/// Greedy word wrap on an average Helvetica glyph width.
fn wrap(text: &str, font_size: f32, width_mm: f32) -> Vec<String> {
    let max_chars = ((width_mm / (font_size * PT_TO_MM * 0.5)) as usize).max(10);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if !current.is_empty() && current.len() + 1 + word.len() > max_chars {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        lines.push(current);
    }
    lines
}

struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    cursor: f32,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, RenderError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| RenderError::Font(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| RenderError::Font(e.to_string()))?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            cursor: PAGE_HEIGHT - MARGIN,
            pages: 1,
        })
    }

    fn ensure(&mut self, height: f32) {
        if self.cursor - height >= MARGIN {
            return;
        }
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = PAGE_HEIGHT - MARGIN;
        self.pages += 1;
    }

    fn gap(&mut self, mm: f32) {
        self.cursor -= mm;
    }

    fn text_at(&mut self, text: &str, size: f32, bold: bool, x: f32) {
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(
            pdf_text(text),
            size,
            Mm(x),
            Mm(self.cursor - size * PT_TO_MM),
            font,
        );
    }

    fn line(&mut self, text: &str, size: f32, bold: bool) {
        let height = size * PT_TO_MM * 1.5;
        self.ensure(height);
        self.text_at(text, size, bold, MARGIN);
        self.cursor -= height;
    }

    fn paragraph(&mut self, text: &str, size: f32) {
        for line in wrap(text, size, CONTENT_WIDTH) {
            self.line(&line, size, false);
        }
    }

    fn rule(&mut self) {
        self.ensure(4.0);
        self.layer
            .set_outline_color(Color::Rgb(Rgb::new(0.6, 0.6, 0.6, None)));
        self.layer.set_outline_thickness(0.5);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(MARGIN), Mm(self.cursor)), false),
                (Point::new(Mm(PAGE_WIDTH - MARGIN), Mm(self.cursor)), false),
            ],
            is_closed: false,
        });
        self.cursor -= 4.0;
    }

    fn heading(&mut self, text: &str) {
        // Keep a heading on the same page as its first line of content.
        self.ensure(14.0);
        self.gap(2.0);
        self.line(text, 12.0, true);
    }

    fn row(&mut self, cells: &[String], widths: &[f32], size: f32, bold: bool) {
        let height = size * PT_TO_MM * 1.6;
        self.ensure(height);
        let mut x = MARGIN;
        for (cell, width) in cells.iter().zip(widths) {
            self.text_at(cell, size, bold, x);
            x += width;
        }
        self.cursor -= height;
    }

    fn image(&mut self, image: &DynamicImage) {
        let (w_px, h_px) = (image.width().max(1) as f32, image.height().max(1) as f32);
        // Pick a DPI that fits the picture into the box at scale 1.
        let dpi = (w_px * 25.4 / IMAGE_MAX_WIDTH).max(h_px * 25.4 / IMAGE_MAX_HEIGHT);
        let width = w_px / dpi * 25.4;
        let height = h_px / dpi * 25.4;
        self.ensure(height + 4.0);
        Image::from_dynamic_image(image).add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(MARGIN + (CONTENT_WIDTH - width) / 2.0)),
                translate_y: Some(Mm(self.cursor - height)),
                dpi: Some(dpi),
                ..Default::default()
            },
        );
        self.cursor -= height + 4.0;
    }

    fn finish(self) -> Result<Vec<u8>, RenderError> {
        log::debug!("Serializing report with {} page(s)", self.pages);
        self.doc
            .save_to_bytes()
            .map_err(|e| RenderError::Output(e.to_string()))
    }
}

/// Lays out `sections` on A4 pages, starting a new page whenever the next
/// block would run into the bottom margin.
pub fn render(title: &str, sections: &[Section], image: ImageBlock) -> Result<Vec<u8>, RenderError> {
    let mut writer = PageWriter::new(title)?;

    for section in sections {
        match section {
            Section::Title { title, subtitle } => {
                writer.line(title, 18.0, true);
                writer.line(subtitle, 10.0, false);
                writer.rule();
            }
            Section::KeyValues { heading, rows } => {
                writer.heading(heading);
                for (key, value) in rows {
                    writer.row(&[key.clone(), value.clone()], &[40.0, 130.0], 10.0, false);
                }
            }
            Section::Paragraph { heading, text } => {
                writer.heading(heading);
                writer.paragraph(text, 10.0);
            }
            Section::SourceImage { caption } => {
                writer.heading("Source Image");
                match &image {
                    ImageBlock::Embedded(picture) => writer.image(picture),
                    ImageBlock::Note(note) => writer.line(note, 10.0, false),
                }
                writer.line(caption, 8.0, false);
            }
            Section::Table {
                heading,
                columns,
                rows,
            } => {
                writer.heading(heading);
                let widths = [45.0, 40.0, 40.0, 45.0];
                writer.row(columns, &widths, 10.0, true);
                for row in rows {
                    writer.row(row, &widths, 10.0, false);
                }
            }
            Section::Footer { lines } => {
                writer.gap(4.0);
                writer.rule();
                for line in lines {
                    writer.line(line, 8.0, false);
                }
            }
        }
    }

    writer.finish()
}
