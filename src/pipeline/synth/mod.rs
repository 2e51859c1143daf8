//! Output document synthesis.
//!
//! - [`pdf`]: raster pages (plus an optional invisible OCR layer) → PDF
//! - [`xlsx`]: extracted tables → OOXML workbook
//! - [`sheet_pdf`]: spreadsheet → paginated table PDF
//!
//! The PDF writers share [`PdfBuilder`], a thin page-at-a-time wrapper over
//! `lopdf`.

pub mod pdf;
pub mod sheet_pdf;
pub mod xlsx;

use crate::error::DocMorphError;
use crate::output::SynthesizedDocument;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// Accumulates pages and writes a complete PDF.
pub(crate) struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    /// Register a standard Type 1 font (WinAnsi encoded).
    pub fn add_font(&mut self, base_font: &str) -> ObjectId {
        self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base_font,
            "Encoding" => "WinAnsiEncoding",
        })
    }

    /// Register a baseline JPEG as an image XObject.
    pub fn add_jpeg(&mut self, width: u32, height: u32, color_space: &str, data: Vec<u8>) -> ObjectId {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            data,
        );
        self.doc.add_object(Object::Stream(stream))
    }

    /// Append a `width × height` pt page drawing `operations`.
    pub fn add_page(
        &mut self,
        width: f32,
        height: f32,
        resources: Dictionary,
        operations: Vec<Operation>,
    ) -> Result<(), DocMorphError> {
        let content = Content { operations }
            .encode()
            .map_err(|e| DocMorphError::Synthesis(format!("content stream: {e}")))?;
        let content_id = self
            .doc
            .add_object(Object::Stream(Stream::new(dictionary! {}, content)));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Resources" => resources,
            "Contents" => content_id,
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Write the page tree and catalog and serialise the document.
    pub fn finish(mut self) -> Result<SynthesizedDocument, DocMorphError> {
        if self.page_ids.is_empty() {
            return Err(DocMorphError::Synthesis("document has no pages".into()));
        }
        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| DocMorphError::Synthesis(e.to_string()))?;
        Ok(SynthesizedDocument::new(buffer))
    }
}

/// A PDF string in WinAnsi encoding. Characters outside Latin-1 become `?`.
pub(crate) fn pdf_text(text: &str) -> Object {
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| match c {
            '\u{20AC}' => 0x80,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\t' | '\n' | '\r' => b' ',
            c if (c as u32) < 0x20 => b' ',
            c if (c as u32) <= 0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_is_an_error() {
        assert!(matches!(
            PdfBuilder::new().finish(),
            Err(DocMorphError::Synthesis(_))
        ));
    }

    #[test]
    fn pages_round_trip_through_lopdf() {
        let mut b = PdfBuilder::new();
        b.add_page(100.0, 50.0, Dictionary::new(), vec![]).unwrap();
        b.add_page(50.0, 100.0, Dictionary::new(), vec![]).unwrap();
        assert_eq!(b.page_count(), 2);
        let doc = b.finish().unwrap();
        let parsed = Document::load_mem(&doc.bytes).unwrap();
        assert_eq!(parsed.get_pages().len(), 2);
    }

    #[test]
    fn text_is_win_ansi() {
        let Object::String(bytes, _) = pdf_text("Café – 5€ 日本") else {
            panic!("not a string");
        };
        assert_eq!(bytes, b"Caf\xE9 \x96 5\x80 ??".to_vec());
    }
}
