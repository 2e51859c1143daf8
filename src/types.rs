//! Domain types that flow between pipeline stages.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Side length of the normalised coordinate square used by OCR boxes.
pub const NORMALIZED_SCALE: f64 = 1000.0;

/// One uploaded input, read into memory and validated for the active kind.
#[derive(Debug, Clone)]
pub struct SourceAsset {
    /// Original file name as supplied by the caller.
    pub name: String,
    /// Declared or guessed mime type (may be empty).
    pub mime_type: String,
    /// Raw file contents.
    pub data: Vec<u8>,
}

impl SourceAsset {
    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        file_stem(&self.name)
    }

    /// View the asset as an image payload for the extraction service.
    pub fn as_image(&self) -> EncodedImage {
        EncodedImage {
            mime_type: self.mime_type.clone(),
            data: self.data.clone(),
        }
    }
}

/// File name without its final extension (`"a.b.pdf"` → `"a.b"`).
pub fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rfind('.') {
        Some(0) | None => base,
        Some(i) => &base[..i],
    }
}

/// An encoded raster image (JPEG, PNG, …) plus its mime type.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl EncodedImage {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Base64 body for inline wire payloads.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One rasterised page. `width`/`height` are the pixel space that OCR boxes
/// are rescaled into.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// 0-based page index in the source document.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub image: EncodedImage,
}

impl RenderedPage {
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }
}

/// One spreadsheet cell as returned by the extraction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Empty,
}

impl From<serde_json::Value> for CellValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => CellValue::Empty,
            Value::Bool(b) => CellValue::Bool(b),
            Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Empty),
            Value::String(s) if s.is_empty() => CellValue::Empty,
            Value::String(s) => CellValue::Text(s),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl From<CellValue> for serde_json::Value {
    fn from(c: CellValue) -> Self {
        match c {
            CellValue::Text(s) => serde_json::Value::String(s),
            CellValue::Number(n) => serde_json::json!(n),
            CellValue::Bool(b) => serde_json::Value::Bool(b),
            CellValue::Empty => serde_json::Value::Null,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::from(serde_json::Value::String(s.to_string()))
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Empty => Ok(()),
        }
    }
}

/// One logical table found in the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTable {
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default, deserialize_with = "lenient_labels")]
    pub headers: Vec<String>,
    /// Data rows; rows may be ragged.
    #[serde(default)]
    pub rows: Vec<Vec<CellValue>>,
}

fn default_sheet_name() -> String {
    "Sheet".to_string()
}

fn lenient_labels<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let cells = Vec::<CellValue>::deserialize(d)?;
    Ok(cells.into_iter().map(|c| c.to_string()).collect())
}

/// A box on the fixed 0–1000 scale, `[ymin, xmin, ymax, xmax]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub ymin: f64,
    pub xmin: f64,
    pub ymax: f64,
    pub xmax: f64,
}

impl BoundingBox {
    /// Build a box from wire order, clamping into range and ordering each axis.
    pub fn from_wire(raw: [f64; 4]) -> Self {
        let clamp = |v: f64| {
            if v.is_finite() {
                v.clamp(0.0, NORMALIZED_SCALE)
            } else {
                0.0
            }
        };
        let [a, b, c, d] = raw.map(clamp);
        Self {
            ymin: a.min(c),
            xmin: b.min(d),
            ymax: a.max(c),
            xmax: b.max(d),
        }
    }

    /// Rescale into a page's pixel space (origin top-left).
    pub fn to_pixels(&self, page_width: u32, page_height: u32) -> PixelRect {
        let w = page_width as f64;
        let h = page_height as f64;
        PixelRect {
            x: self.xmin / NORMALIZED_SCALE * w,
            y: self.ymin / NORMALIZED_SCALE * h,
            width: (self.xmax - self.xmin) / NORMALIZED_SCALE * w,
            height: (self.ymax - self.ymin) / NORMALIZED_SCALE * h,
        }
    }
}

/// A rectangle in page pixel space, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One recognised text region.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrBlock {
    pub text: String,
    pub bbox: BoundingBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_strips_last_extension_only() {
        assert_eq!(file_stem("report.v2.pdf"), "report.v2");
        assert_eq!(file_stem("scan.JPG"), "scan");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(file_stem("/tmp/in/a.xlsx"), "a");
    }

    #[test]
    fn bbox_from_wire_orders_and_clamps() {
        let b = BoundingBox::from_wire([900.0, -20.0, 100.0, 1200.0]);
        assert_eq!(b.ymin, 100.0);
        assert_eq!(b.ymax, 900.0);
        assert_eq!(b.xmin, 0.0);
        assert_eq!(b.xmax, 1000.0);
    }

    #[test]
    fn bbox_rescales_into_pixel_space() {
        let b = BoundingBox::from_wire([100.0, 250.0, 200.0, 750.0]);
        let r = b.to_pixels(800, 600);
        assert_eq!(r.x, 200.0);
        assert_eq!(r.y, 60.0);
        assert_eq!(r.width, 400.0);
        assert_eq!(r.height, 60.0);
    }

    #[test]
    fn rescaling_preserves_vertical_order() {
        let tops = [10.0, 120.0, 120.5, 640.0, 999.0];
        let boxes: Vec<BoundingBox> = tops
            .iter()
            .map(|&y| BoundingBox::from_wire([y, 0.0, (y + 5.0).min(1000.0), 10.0]))
            .collect();
        for (w, h) in [(1, 1), (612, 792), (4000, 3000)] {
            let ys: Vec<f64> = boxes.iter().map(|b| b.to_pixels(w, h).y).collect();
            assert!(ys.windows(2).all(|p| p[0] <= p[1]), "order broken at {w}x{h}");
        }
    }

    #[test]
    fn table_deserialises_mixed_cells() {
        let json = r#"{"sheetName":"Q1","headers":["Item", 2024],"rows":[["Pens", 3.5, null], ["Ink"]]}"#;
        let t: ExtractedTable = serde_json::from_str(json).unwrap();
        assert_eq!(t.headers, vec!["Item", "2024"]);
        assert_eq!(t.rows[0][1], CellValue::Number(3.5));
        assert_eq!(t.rows[0][2], CellValue::Empty);
        assert_eq!(t.rows[1].len(), 1);
    }

    #[test]
    fn table_defaults_missing_fields() {
        let t: ExtractedTable = serde_json::from_str("{}").unwrap();
        assert_eq!(t.sheet_name, "Sheet");
        assert!(t.headers.is_empty());
        assert!(t.rows.is_empty());
    }

    #[test]
    fn cell_display() {
        assert_eq!(CellValue::Number(42.0).to_string(), "42");
        assert_eq!(CellValue::Number(0.25).to_string(), "0.25");
        assert_eq!(CellValue::Bool(true).to_string(), "TRUE");
        assert_eq!(CellValue::Empty.to_string(), "");
    }
}
