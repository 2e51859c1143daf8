//! Spreadsheet → PDF: one titled, styled table per non-empty sheet.
//!
//! Layout is A4 landscape in points. Column widths follow the widest cell
//! in each column, scaled to fill the printable width. Long cells wrap.
//! Rows that run past the bottom margin continue on a new page under a
//! repeated header row.

use super::{pdf_text, PdfBuilder};
use crate::error::DocMorphError;
use crate::output::SynthesizedDocument;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use lopdf::content::Operation;
use lopdf::{dictionary, Object, ObjectId};
use std::io::Cursor;
use tracing::{debug, info};

const MM: f32 = 72.0 / 25.4;

const PAGE_W: f32 = 842.0;
const PAGE_H: f32 = 595.0;
const MARGIN_X: f32 = 14.0 * MM;
const MARGIN_BOTTOM: f32 = 10.0 * MM;
const TITLE_Y: f32 = 15.0 * MM;
const TITLE_SIZE: f32 = 16.0;
const TABLE_TOP_FIRST: f32 = 22.0 * MM;
const TABLE_TOP_CONT: f32 = 25.0 * MM;
const FONT_SIZE: f32 = 8.0;
const LINE_H: f32 = FONT_SIZE * 1.15;
const PAD: f32 = 2.0 * MM;

const HEAD_FILL: [f32; 3] = [79.0 / 255.0, 70.0 / 255.0, 229.0 / 255.0];
const STRIPE_FILL: [f32; 3] = [245.0 / 255.0, 245.0 / 255.0, 245.0 / 255.0];
const BODY_TEXT: f32 = 0.2;

/// One sheet with blank rows removed. `rows[0]` is the header row.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetGrid {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Read every sheet of an `.xlsx`/`.xls` workbook, dropping blank rows.
/// Sheets left with no rows are omitted.
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<SheetGrid>, DocMorphError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| DocMorphError::Synthesis(format!("cannot parse spreadsheet: {e}")))?;

    let mut grids = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| DocMorphError::Synthesis(format!("sheet '{name}': {e}")))?;
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|r| r.iter().map(cell_text).collect::<Vec<_>>())
            .filter(|r: &Vec<String>| r.iter().any(|c| !c.trim().is_empty()))
            .collect();
        if rows.is_empty() {
            debug!("Skipping empty sheet '{}'", name);
            continue;
        }
        grids.push(SheetGrid { name, rows });
    }
    Ok(grids)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Data::Error(e) => format!("#{e:?}"),
        other => other.to_string(),
    }
}

/// Parse a workbook and lay it out as PDF.
///
/// `on_sheet(done, total, name)` is called after each sheet is placed.
pub fn workbook_to_pdf(
    bytes: &[u8],
    on_sheet: &(dyn Fn(usize, usize, &str) + Send + Sync),
) -> Result<SynthesizedDocument, DocMorphError> {
    let grids = read_workbook(bytes)?;
    if grids.is_empty() {
        return Err(DocMorphError::Synthesis(
            "the workbook has no sheets with data".into(),
        ));
    }
    info!("Laying out {} sheet(s)", grids.len());
    grids_to_pdf(&grids, on_sheet)
}

/// Lay out already-parsed sheets.
pub fn grids_to_pdf(
    grids: &[SheetGrid],
    on_sheet: &(dyn Fn(usize, usize, &str) + Send + Sync),
) -> Result<SynthesizedDocument, DocMorphError> {
    let mut builder = PdfBuilder::new();
    let fonts = Fonts {
        regular: builder.add_font("Helvetica"),
        bold: builder.add_font("Helvetica-Bold"),
    };

    for (i, grid) in grids.iter().enumerate() {
        layout_sheet(&mut builder, &fonts, grid)?;
        on_sheet(i + 1, grids.len(), &grid.name);
    }
    builder.finish()
}

struct Fonts {
    regular: ObjectId,
    bold: ObjectId,
}

/// Approximate Helvetica advance width of `s` at `size`.
fn text_width(s: &str, size: f32, bold: bool) -> f32 {
    let em: f32 = s
        .chars()
        .map(|c| match c {
            'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '|' | '!' | 'I' => 0.28,
            'f' | 't' | 'r' | ' ' | '(' | ')' | '[' | ']' | '-' => 0.33,
            'm' | 'w' | 'M' | 'W' | '@' => 0.83,
            c if c.is_ascii_uppercase() => 0.67,
            c if c.is_ascii_digit() => 0.556,
            _ => 0.52,
        })
        .sum();
    em * size * if bold { 1.06 } else { 1.0 }
}

/// Greedy word wrap to `max` points; words wider than a line are split.
fn wrap(s: &str, max: f32, bold: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for para in s.split('\n') {
        let mut line = String::new();
        for word in para.split_whitespace() {
            let trial = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if text_width(&trial, FONT_SIZE, bold) <= max {
                line = trial;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            for ch in word.chars() {
                line.push(ch);
                if text_width(&line, FONT_SIZE, bold) > max && line.chars().count() > 1 {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(ch);
                }
            }
        }
        lines.push(line);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Column widths that fill the printable width, proportional to content.
fn column_widths(rows: &[Vec<String>]) -> Vec<f32> {
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let avail = PAGE_W - 2.0 * MARGIN_X;
    let mut natural = vec![0.0f32; cols];
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let longest = cell
                .split('\n')
                .map(|l| text_width(l, FONT_SIZE, r == 0))
                .fold(0.0, f32::max);
            natural[c] = natural[c].max(longest + 2.0 * PAD);
        }
    }
    // Keep a floor so empty columns stay visible and one huge column
    // cannot squeeze the rest to nothing.
    let floor = (avail / cols as f32).min(40.0);
    let cap = avail * 0.5;
    for w in natural.iter_mut() {
        *w = w.clamp(floor, cap.max(floor));
    }
    let total: f32 = natural.iter().sum();
    natural.iter().map(|w| w * avail / total).collect()
}

struct RowLayout {
    lines: Vec<Vec<String>>,
    height: f32,
}

fn layout_row(row: &[String], widths: &[f32], bold: bool) -> RowLayout {
    let lines: Vec<Vec<String>> = widths
        .iter()
        .enumerate()
        .map(|(c, w)| {
            let text = row.get(c).map(String::as_str).unwrap_or("");
            wrap(text, (w - 2.0 * PAD).max(1.0), bold)
        })
        .collect();
    let max_lines = lines.iter().map(Vec::len).max().unwrap_or(1).max(1);
    RowLayout {
        lines,
        height: max_lines as f32 * LINE_H + 2.0 * PAD,
    }
}

fn draw_row(
    ops: &mut Vec<Operation>,
    layout: &RowLayout,
    widths: &[f32],
    top: f32,
    fill: Option<[f32; 3]>,
    header: bool,
) {
    let y_bottom = PAGE_H - top - layout.height;
    if let Some([r, g, b]) = fill {
        ops.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
        ops.push(Operation::new(
            "re",
            vec![
                MARGIN_X.into(),
                y_bottom.into(),
                widths.iter().sum::<f32>().into(),
                layout.height.into(),
            ],
        ));
        ops.push(Operation::new("f", vec![]));
    }

    let text_gray = if header { 1.0 } else { BODY_TEXT };
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "rg",
        vec![text_gray.into(), text_gray.into(), text_gray.into()],
    ));
    ops.push(Operation::new(
        "Tf",
        vec![(if header { "F2" } else { "F1" }).into(), FONT_SIZE.into()],
    ));
    let mut x = MARGIN_X;
    for (c, w) in widths.iter().enumerate() {
        for (l, line) in layout.lines[c].iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            let baseline = PAGE_H - top - PAD - FONT_SIZE - l as f32 * LINE_H;
            ops.push(Operation::new(
                "Tm",
                vec![
                    1.into(),
                    0.into(),
                    0.into(),
                    1.into(),
                    (x + PAD).into(),
                    baseline.into(),
                ],
            ));
            ops.push(Operation::new("Tj", vec![pdf_text(line)]));
        }
        x += w;
    }
    ops.push(Operation::new("ET", vec![]));
}

fn layout_sheet(builder: &mut PdfBuilder, fonts: &Fonts, grid: &SheetGrid) -> Result<(), DocMorphError> {
    let widths = column_widths(&grid.rows);
    let header = layout_row(&grid.rows[0], &widths, true);
    let resources = || {
        dictionary! {
            "Font" => dictionary! {
                "F1" => Object::Reference(fonts.regular),
                "F2" => Object::Reference(fonts.bold),
            },
        }
    };

    let mut ops = title_ops(&grid.name);
    let mut top = TABLE_TOP_FIRST;
    draw_row(&mut ops, &header, &widths, top, Some(HEAD_FILL), true);
    top += header.height;
    let mut pages = 1;

    for (i, row) in grid.rows[1..].iter().enumerate() {
        let layout = layout_row(row, &widths, false);
        if top + layout.height > PAGE_H - MARGIN_BOTTOM {
            builder.add_page(PAGE_W, PAGE_H, resources(), std::mem::take(&mut ops))?;
            pages += 1;
            top = TABLE_TOP_CONT;
            draw_row(&mut ops, &header, &widths, top, Some(HEAD_FILL), true);
            top += header.height;
        }
        let fill = (i % 2 == 1).then_some(STRIPE_FILL);
        draw_row(&mut ops, &layout, &widths, top, fill, false);
        top += layout.height;
    }
    builder.add_page(PAGE_W, PAGE_H, resources(), ops)?;
    debug!(
        "Sheet '{}': {} row(s) over {} page(s)",
        grid.name,
        grid.rows.len(),
        pages
    );
    Ok(())
}

fn title_ops(title: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("rg", vec![0.into(), 0.into(), 0.into()]),
        Operation::new("Tf", vec!["F1".into(), TITLE_SIZE.into()]),
        Operation::new(
            "Tm",
            vec![
                1.into(),
                0.into(),
                0.into(),
                1.into(),
                MARGIN_X.into(),
                (PAGE_H - TITLE_Y).into(),
            ],
        ),
        Operation::new("Tj", vec![pdf_text(title)]),
        Operation::new("ET", vec![]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::synth::xlsx::tables_to_xlsx;
    use crate::types::{CellValue, ExtractedTable};
    use lopdf::content::Content;
    use lopdf::Document;

    fn grid(name: &str, rows: usize) -> SheetGrid {
        let mut data = vec![vec!["Item".to_string(), "Qty".to_string()]];
        data.extend((0..rows).map(|i| vec![format!("row {i}"), i.to_string()]));
        SheetGrid {
            name: name.into(),
            rows: data,
        }
    }

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).unwrap().get_pages().len()
    }

    #[test]
    fn one_page_per_short_sheet() {
        let doc = grids_to_pdf(&[grid("A", 3), grid("B", 1)], &|_, _, _| {}).unwrap();
        assert_eq!(page_count(&doc.bytes), 2);
    }

    #[test]
    fn long_sheet_continues_on_new_pages() {
        let doc = grids_to_pdf(&[grid("Long", 200)], &|_, _, _| {}).unwrap();
        assert!(page_count(&doc.bytes) > 1);
        // Header is repeated on every page.
        let needle = b"(Qty) Tj";
        let repeats = doc.bytes.windows(needle.len()).filter(|w| w == needle).count();
        assert_eq!(repeats, page_count(&doc.bytes));
    }

    #[test]
    fn header_is_indigo_filled() {
        let doc = grids_to_pdf(&[grid("S", 1)], &|_, _, _| {}).unwrap();
        let parsed = Document::load_mem(&doc.bytes).unwrap();
        let page_id = *parsed.get_pages().values().next().unwrap();
        let content = Content::decode(&parsed.get_page_content(page_id).unwrap()).unwrap();
        let fill = content
            .operations
            .iter()
            .find(|op| op.operator == "rg" && op.operands[2].as_float().unwrap() > 0.8)
            .expect("indigo fill missing");
        let rgb: Vec<f32> = fill.operands.iter().map(|o| o.as_float().unwrap()).collect();
        assert!((rgb[0] * 255.0 - 79.0).abs() < 0.5);
        assert!((rgb[1] * 255.0 - 70.0).abs() < 0.5);
        assert!((rgb[2] * 255.0 - 229.0).abs() < 0.5);
    }

    #[test]
    fn progress_called_per_sheet() {
        let seen = std::sync::Mutex::new(Vec::new());
        grids_to_pdf(&[grid("A", 1), grid("B", 1)], &|d, t, n| {
            seen.lock().unwrap().push((d, t, n.to_string()))
        })
        .unwrap();
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![(1, 2, "A".to_string()), (2, 2, "B".to_string())]
        );
    }

    #[test]
    fn wrap_splits_long_text() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 60.0, false);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| text_width(l, FONT_SIZE, false) <= 60.0));
        assert_eq!(wrap("", 50.0, false), vec![String::new()]);
    }

    #[test]
    fn widths_fill_printable_area() {
        let w = column_widths(&grid("x", 5).rows);
        let total: f32 = w.iter().sum();
        assert!((total - (PAGE_W - 2.0 * MARGIN_X)).abs() < 0.01);
    }

    #[test]
    fn reads_generated_workbook_and_skips_blank_rows() {
        let tables = vec![
            ExtractedTable {
                sheet_name: "Data".into(),
                headers: vec!["a".into(), "b".into()],
                rows: vec![
                    vec![CellValue::Number(1.0), CellValue::Text("x".into())],
                    vec![CellValue::Empty, CellValue::Empty],
                    vec![CellValue::Number(2.5), CellValue::Bool(false)],
                ],
            },
            ExtractedTable {
                sheet_name: "Blank".into(),
                headers: vec![],
                rows: vec![],
            },
        ];
        let xlsx = tables_to_xlsx(&tables).unwrap();
        let grids = read_workbook(&xlsx.bytes).unwrap();
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0].name, "Data");
        assert_eq!(
            grids[0].rows,
            vec![
                vec!["a".to_string(), "b".to_string()],
                vec!["1".to_string(), "x".to_string()],
                vec!["2.5".to_string(), "FALSE".to_string()],
            ]
        );
    }

    #[test]
    fn workbook_without_data_is_an_error() {
        let xlsx = tables_to_xlsx(&[ExtractedTable {
            sheet_name: "Empty".into(),
            headers: vec![],
            rows: vec![],
        }])
        .unwrap();
        let err = workbook_to_pdf(&xlsx.bytes, &|_, _, _| {}).unwrap_err();
        assert!(matches!(err, DocMorphError::Synthesis(_)));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(workbook_to_pdf(b"not a workbook", &|_, _, _| {}).is_err());
    }
}
