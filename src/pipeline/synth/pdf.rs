//! Raster pages → PDF, one page per image at 1 px = 1 pt.
//!
//! Gray and RGB JPEGs are embedded byte-for-byte. Everything else (PNG, GIF,
//! WebP, CMYK JPEG, …) is decoded, flattened onto white and re-encoded.
//!
//! When OCR blocks are supplied, each block is drawn as invisible text
//! (render mode 3) over the image so the page becomes searchable and
//! selectable without changing how it looks.

use super::{pdf_text, PdfBuilder};
use crate::error::DocMorphError;
use crate::output::SynthesizedDocument;
use crate::pipeline::encode::{decode, encode_jpeg};
use crate::types::{OcrBlock, RenderedPage};
use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, Rgb, RgbImage};
use lopdf::content::Operation;
use lopdf::dictionary;
use std::io::Cursor;
use tracing::debug;

/// Quality used when a non-JPEG image has to be re-encoded.
const REENCODE_QUALITY: u8 = 92;

/// Fraction of the box height used for font size and baseline offset.
const TEXT_HEIGHT_RATIO: f64 = 0.8;

/// Build a PDF with one page per image, in order.
///
/// `ocr`, when present, is indexed like `pages`; a missing or empty entry
/// means that page has no text layer.
pub fn images_to_pdf(
    pages: &[RenderedPage],
    ocr: Option<&[Vec<OcrBlock>]>,
) -> Result<SynthesizedDocument, DocMorphError> {
    if pages.is_empty() {
        return Err(DocMorphError::Synthesis("no images to place".into()));
    }

    let mut builder = PdfBuilder::new();
    let font_id = ocr.map(|_| builder.add_font("Helvetica"));

    for (i, page) in pages.iter().enumerate() {
        let (width, height, color_space, data) = jpeg_payload(page)?;
        let image_id = builder.add_jpeg(width, height, color_space, data);

        let (w, h) = (width as f32, height as f32);
        let mut ops = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()],
            ),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
        ];

        let mut resources = dictionary! {
            "XObject" => dictionary! { "Im1" => image_id },
        };

        let blocks = ocr.and_then(|o| o.get(i)).filter(|b| !b.is_empty());
        if let (Some(blocks), Some(font_id)) = (blocks, font_id) {
            resources.set("Font", dictionary! { "F1" => font_id });
            ops.extend(text_layer(blocks, width, height));
            debug!("Page {}: {} OCR block(s) in text layer", i + 1, blocks.len());
        }

        builder.add_page(w, h, resources, ops)?;
    }

    builder.finish()
}

/// Invisible text operations for `blocks` on a `width × height` page.
pub(crate) fn text_layer(blocks: &[OcrBlock], width: u32, height: u32) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tr", vec![3.into()]),
    ];
    for block in blocks {
        let rect = block.bbox.to_pixels(width, height);
        let size = rect.height * TEXT_HEIGHT_RATIO;
        if size <= 0.0 {
            continue;
        }
        // Box origin is top-left; PDF user space is bottom-left.
        let baseline = height as f64 - (rect.y + size);
        ops.push(Operation::new("Tf", vec!["F1".into(), (size as f32).into()]));
        ops.push(Operation::new(
            "Tm",
            vec![
                1.into(),
                0.into(),
                0.into(),
                1.into(),
                (rect.x as f32).into(),
                (baseline as f32).into(),
            ],
        ));
        ops.push(Operation::new("Tj", vec![pdf_text(&block.text)]));
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}

/// JPEG bytes, dimensions and colour space for a page image.
fn jpeg_payload(page: &RenderedPage) -> Result<(u32, u32, &'static str, Vec<u8>), DocMorphError> {
    if let Some((w, h, cs)) = passthrough_jpeg(&page.image.data) {
        return Ok((w, h, cs, page.image.data.clone()));
    }

    let img = decode(&page.image.data).map_err(|e| {
        DocMorphError::Synthesis(format!("page {}: cannot decode image: {e}", page.index + 1))
    })?;
    let flat = flatten_on_white(&img);
    let (w, h) = (flat.width(), flat.height());
    let encoded = encode_jpeg(&DynamicImage::ImageRgb8(flat), REENCODE_QUALITY)
        .map_err(|e| DocMorphError::Synthesis(e.to_string()))?;
    Ok((w, h, "DeviceRGB", encoded.data))
}

/// `Some` when `data` is a JPEG a PDF reader can decode as-is.
fn passthrough_jpeg(data: &[u8]) -> Option<(u32, u32, &'static str)> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let decoder = JpegDecoder::new(Cursor::new(data)).ok()?;
    let (w, h) = decoder.dimensions();
    let color_space = match decoder.original_color_type() {
        ExtendedColorType::L8 => "DeviceGray",
        ExtendedColorType::Rgb8 => "DeviceRGB",
        _ => return None,
    };
    Some((w, h, color_space))
}

fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let a = px[3] as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, EncodedImage};
    use image::{ImageFormat, Rgba, RgbaImage};
    use lopdf::Document;

    fn jpeg_page(index: usize, w: u32, h: u32) -> RenderedPage {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 200, 30])));
        RenderedPage {
            index,
            width: w,
            height: h,
            image: encode_jpeg(&img, 80).unwrap(),
        }
    }

    fn png_page(w: u32, h: u32) -> RenderedPage {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        RenderedPage {
            index: 0,
            width: w,
            height: h,
            image: EncodedImage::new(buf, "image/png"),
        }
    }

    fn media_boxes(bytes: &[u8]) -> Vec<(f32, f32)> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let page = doc.get_dictionary(*id).unwrap();
                let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
                (mb[2].as_float().unwrap(), mb[3].as_float().unwrap())
            })
            .collect()
    }

    #[test]
    fn one_page_per_image_sized_to_pixels() {
        let pages = vec![jpeg_page(0, 40, 20), jpeg_page(1, 20, 40)];
        let doc = images_to_pdf(&pages, None).unwrap();
        assert_eq!(media_boxes(&doc.bytes), vec![(40.0, 20.0), (20.0, 40.0)]);
        assert_eq!(doc.size, doc.bytes.len());
    }

    #[test]
    fn jpeg_is_embedded_verbatim() {
        let page = jpeg_page(0, 16, 16);
        let doc = images_to_pdf(std::slice::from_ref(&page), None).unwrap();
        let needle = &page.image.data[..32];
        assert!(doc.bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn png_with_alpha_is_reencoded() {
        let doc = images_to_pdf(&[png_page(12, 8)], None).unwrap();
        assert_eq!(media_boxes(&doc.bytes), vec![(12.0, 8.0)]);
    }

    #[test]
    fn text_layer_is_invisible_and_placed_from_top() {
        let blocks = vec![OcrBlock {
            text: "Total".into(),
            bbox: BoundingBox::from_wire([100.0, 250.0, 200.0, 750.0]),
        }];
        let ops = text_layer(&blocks, 800, 600);
        assert_eq!(ops[1].operator, "Tr");
        assert_eq!(ops[1].operands[0].as_i64().unwrap(), 3);

        // h = 60 px → size 48, top y = 60 → baseline 600 - (60 + 48) = 492
        let tf = ops.iter().find(|o| o.operator == "Tf").unwrap();
        assert_eq!(tf.operands[1].as_float().unwrap(), 48.0);
        let tm = ops.iter().find(|o| o.operator == "Tm").unwrap();
        assert_eq!(tm.operands[4].as_float().unwrap(), 200.0);
        assert_eq!(tm.operands[5].as_float().unwrap(), 492.0);
    }

    #[test]
    fn ocr_text_ends_up_in_the_pdf() {
        let pages = vec![jpeg_page(0, 100, 100)];
        let ocr = vec![vec![OcrBlock {
            text: "INVOICE-42".into(),
            bbox: BoundingBox::from_wire([10.0, 10.0, 50.0, 500.0]),
        }]];
        let doc = images_to_pdf(&pages, Some(&ocr)).unwrap();
        let needle = b"(INVOICE-42) Tj";
        assert!(doc.bytes.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn zero_area_boxes_are_skipped() {
        let blocks = vec![OcrBlock {
            text: "flat".into(),
            bbox: BoundingBox::from_wire([300.0, 0.0, 300.0, 100.0]),
        }];
        let ops = text_layer(&blocks, 100, 100);
        assert!(!ops.iter().any(|o| o.operator == "Tj"));
    }

    #[test]
    fn empty_input_is_synthesis_error() {
        assert!(matches!(
            images_to_pdf(&[], None),
            Err(DocMorphError::Synthesis(_))
        ));
    }
}
