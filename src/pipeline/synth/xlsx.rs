//! Extracted tables → OOXML workbook (`.xlsx`).
//!
//! The workbook is the minimal part set Excel, LibreOffice and `calamine`
//! all accept: content types, package and workbook relationships, a styles
//! part with a bold header font, and one worksheet per table. Strings are
//! written inline so no shared-string table is needed.

use crate::error::DocMorphError;
use crate::output::SynthesizedDocument;
use crate::types::{CellValue, ExtractedTable};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Excel's limit on worksheet tab names.
pub const MAX_SHEET_NAME_LEN: usize = 31;

const FORBIDDEN: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Hands out valid, unique worksheet names.
#[derive(Debug, Default)]
pub struct SheetNamer {
    used: HashSet<String>,
}

impl SheetNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitise `wanted` and make it unique (case-insensitively) among the
    /// names handed out so far.
    pub fn assign(&mut self, wanted: &str) -> String {
        let cleaned: String = wanted
            .chars()
            .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { '_' } else { c })
            .collect();
        let cleaned = cleaned.trim().trim_matches('\'').trim();
        let base = if cleaned.is_empty() { "Sheet" } else { cleaned };

        let mut candidate = truncate_chars(base, MAX_SHEET_NAME_LEN);
        let mut n = 2;
        while self.used.contains(&candidate.to_lowercase()) {
            let suffix = format!("_{n}");
            let keep = MAX_SHEET_NAME_LEN - suffix.chars().count();
            candidate = format!("{}{}", truncate_chars(base, keep), suffix);
            n += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Spreadsheet column letters for a 0-based index (`0 → A`, `26 → AA`).
pub fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

/// Build a workbook with one sheet per table, headers in the first row.
pub fn tables_to_xlsx(tables: &[ExtractedTable]) -> Result<SynthesizedDocument, DocMorphError> {
    if tables.is_empty() {
        return Err(DocMorphError::Synthesis(
            "no tables were found to put in the spreadsheet".into(),
        ));
    }

    let mut namer = SheetNamer::new();
    let names: Vec<String> = tables.iter().map(|t| namer.assign(&t.sheet_name)).collect();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut put = |path: &str, body: Vec<u8>| -> Result<(), DocMorphError> {
        zip.start_file(path, options).map_err(synth_err)?;
        zip.write_all(&body).map_err(synth_err)
    };

    put("[Content_Types].xml", content_types(tables.len())?)?;
    put("_rels/.rels", root_rels()?)?;
    put("xl/workbook.xml", workbook(&names)?)?;
    put("xl/_rels/workbook.xml.rels", workbook_rels(tables.len())?)?;
    put("xl/styles.xml", styles()?)?;
    for (i, table) in tables.iter().enumerate() {
        put(&format!("xl/worksheets/sheet{}.xml", i + 1), worksheet(table)?)?;
        debug!(
            "Sheet '{}': {} header(s), {} row(s)",
            names[i],
            table.headers.len(),
            table.rows.len()
        );
    }

    let bytes = zip.finish().map_err(synth_err)?.into_inner();
    Ok(SynthesizedDocument::new(bytes))
}

fn synth_err(e: impl std::fmt::Display) -> DocMorphError {
    DocMorphError::Synthesis(e.to_string())
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn new_doc() -> Result<XmlWriter, DocMorphError> {
    let mut w = Writer::new(Cursor::new(Vec::new()));
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(synth_err)?;
    Ok(w)
}

fn start(w: &mut XmlWriter, tag: BytesStart<'_>) -> Result<(), DocMorphError> {
    w.write_event(Event::Start(tag)).map_err(synth_err)
}

fn end(w: &mut XmlWriter, name: &str) -> Result<(), DocMorphError> {
    w.write_event(Event::End(BytesEnd::new(name))).map_err(synth_err)
}

fn empty(w: &mut XmlWriter, tag: BytesStart<'_>) -> Result<(), DocMorphError> {
    w.write_event(Event::Empty(tag)).map_err(synth_err)
}

fn text(w: &mut XmlWriter, s: &str) -> Result<(), DocMorphError> {
    w.write_event(Event::Text(BytesText::new(s))).map_err(synth_err)
}

fn finish(w: XmlWriter) -> Vec<u8> {
    w.into_inner().into_inner()
}

fn content_types(sheets: usize) -> Result<Vec<u8>, DocMorphError> {
    let mut w = new_doc()?;
    start(
        &mut w,
        BytesStart::new("Types").with_attributes([(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/content-types",
        )]),
    )?;
    empty(
        &mut w,
        BytesStart::new("Default").with_attributes([
            ("Extension", "rels"),
            ("ContentType", "application/vnd.openxmlformats-package.relationships+xml"),
        ]),
    )?;
    empty(
        &mut w,
        BytesStart::new("Default").with_attributes([("Extension", "xml"), ("ContentType", "application/xml")]),
    )?;
    empty(
        &mut w,
        BytesStart::new("Override").with_attributes([
            ("PartName", "/xl/workbook.xml"),
            (
                "ContentType",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
            ),
        ]),
    )?;
    empty(
        &mut w,
        BytesStart::new("Override").with_attributes([
            ("PartName", "/xl/styles.xml"),
            (
                "ContentType",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml",
            ),
        ]),
    )?;
    for i in 1..=sheets {
        let part = format!("/xl/worksheets/sheet{i}.xml");
        empty(
            &mut w,
            BytesStart::new("Override").with_attributes([
                ("PartName", part.as_str()),
                (
                    "ContentType",
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml",
                ),
            ]),
        )?;
    }
    end(&mut w, "Types")?;
    Ok(finish(w))
}

fn root_rels() -> Result<Vec<u8>, DocMorphError> {
    let mut w = new_doc()?;
    start(
        &mut w,
        BytesStart::new("Relationships").with_attributes([(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/relationships",
        )]),
    )?;
    empty(
        &mut w,
        BytesStart::new("Relationship").with_attributes([
            ("Id", "rId1"),
            (
                "Type",
                "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument",
            ),
            ("Target", "xl/workbook.xml"),
        ]),
    )?;
    end(&mut w, "Relationships")?;
    Ok(finish(w))
}

fn workbook(names: &[String]) -> Result<Vec<u8>, DocMorphError> {
    let mut w = new_doc()?;
    start(
        &mut w,
        BytesStart::new("workbook").with_attributes([("xmlns", NS_MAIN), ("xmlns:r", NS_REL)]),
    )?;
    start(&mut w, BytesStart::new("sheets"))?;
    for (i, name) in names.iter().enumerate() {
        let id = (i + 1).to_string();
        let rid = format!("rId{}", i + 1);
        empty(
            &mut w,
            BytesStart::new("sheet").with_attributes([
                ("name", name.as_str()),
                ("sheetId", id.as_str()),
                ("r:id", rid.as_str()),
            ]),
        )?;
    }
    end(&mut w, "sheets")?;
    end(&mut w, "workbook")?;
    Ok(finish(w))
}

fn workbook_rels(sheets: usize) -> Result<Vec<u8>, DocMorphError> {
    let mut w = new_doc()?;
    start(
        &mut w,
        BytesStart::new("Relationships").with_attributes([(
            "xmlns",
            "http://schemas.openxmlformats.org/package/2006/relationships",
        )]),
    )?;
    for i in 1..=sheets {
        let rid = format!("rId{i}");
        let target = format!("worksheets/sheet{i}.xml");
        empty(
            &mut w,
            BytesStart::new("Relationship").with_attributes([
                ("Id", rid.as_str()),
                (
                    "Type",
                    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet",
                ),
                ("Target", target.as_str()),
            ]),
        )?;
    }
    let styles_id = format!("rId{}", sheets + 1);
    empty(
        &mut w,
        BytesStart::new("Relationship").with_attributes([
            ("Id", styles_id.as_str()),
            (
                "Type",
                "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles",
            ),
            ("Target", "styles.xml"),
        ]),
    )?;
    end(&mut w, "Relationships")?;
    Ok(finish(w))
}

/// Two cell formats: 0 = default, 1 = bold (header row).
fn styles() -> Result<Vec<u8>, DocMorphError> {
    let mut w = new_doc()?;
    start(&mut w, BytesStart::new("styleSheet").with_attributes([("xmlns", NS_MAIN)]))?;

    start(&mut w, BytesStart::new("fonts").with_attributes([("count", "2")]))?;
    start(&mut w, BytesStart::new("font"))?;
    empty(&mut w, BytesStart::new("sz").with_attributes([("val", "11")]))?;
    empty(&mut w, BytesStart::new("name").with_attributes([("val", "Calibri")]))?;
    end(&mut w, "font")?;
    start(&mut w, BytesStart::new("font"))?;
    empty(&mut w, BytesStart::new("b"))?;
    empty(&mut w, BytesStart::new("sz").with_attributes([("val", "11")]))?;
    empty(&mut w, BytesStart::new("name").with_attributes([("val", "Calibri")]))?;
    end(&mut w, "font")?;
    end(&mut w, "fonts")?;

    start(&mut w, BytesStart::new("fills").with_attributes([("count", "2")]))?;
    for pattern in ["none", "gray125"] {
        start(&mut w, BytesStart::new("fill"))?;
        empty(&mut w, BytesStart::new("patternFill").with_attributes([("patternType", pattern)]))?;
        end(&mut w, "fill")?;
    }
    end(&mut w, "fills")?;

    start(&mut w, BytesStart::new("borders").with_attributes([("count", "1")]))?;
    empty(&mut w, BytesStart::new("border"))?;
    end(&mut w, "borders")?;

    start(&mut w, BytesStart::new("cellStyleXfs").with_attributes([("count", "1")]))?;
    empty(
        &mut w,
        BytesStart::new("xf").with_attributes([
            ("numFmtId", "0"),
            ("fontId", "0"),
            ("fillId", "0"),
            ("borderId", "0"),
        ]),
    )?;
    end(&mut w, "cellStyleXfs")?;

    start(&mut w, BytesStart::new("cellXfs").with_attributes([("count", "2")]))?;
    for font in ["0", "1"] {
        empty(
            &mut w,
            BytesStart::new("xf").with_attributes([
                ("numFmtId", "0"),
                ("fontId", font),
                ("fillId", "0"),
                ("borderId", "0"),
                ("xfId", "0"),
            ]),
        )?;
    }
    end(&mut w, "cellXfs")?;

    end(&mut w, "styleSheet")?;
    Ok(finish(w))
}

/// Strip characters XML 1.0 cannot carry.
fn xml_safe(s: &str) -> String {
    s.chars()
        .filter(|&c| !(c.is_control() && c != '\t' && c != '\n' && c != '\r'))
        .collect()
}

fn write_cell(
    w: &mut XmlWriter,
    reference: &str,
    value: &CellValue,
    style: Option<&str>,
) -> Result<(), DocMorphError> {
    let mut tag = BytesStart::new("c").with_attributes([("r", reference)]);
    if let Some(s) = style {
        tag.push_attribute(("s", s));
    }
    match value {
        CellValue::Empty => Ok(()),
        CellValue::Number(n) if n.is_finite() => {
            start(w, tag)?;
            start(w, BytesStart::new("v"))?;
            text(w, &n.to_string())?;
            end(w, "v")?;
            end(w, "c")
        }
        CellValue::Bool(b) => {
            tag.push_attribute(("t", "b"));
            start(w, tag)?;
            start(w, BytesStart::new("v"))?;
            text(w, if *b { "1" } else { "0" })?;
            end(w, "v")?;
            end(w, "c")
        }
        other => {
            tag.push_attribute(("t", "inlineStr"));
            start(w, tag)?;
            start(w, BytesStart::new("is"))?;
            start(w, BytesStart::new("t").with_attributes([("xml:space", "preserve")]))?;
            text(w, &xml_safe(&other.to_string()))?;
            end(w, "t")?;
            end(w, "is")?;
            end(w, "c")
        }
    }
}

fn worksheet(table: &ExtractedTable) -> Result<Vec<u8>, DocMorphError> {
    let mut w = new_doc()?;
    start(&mut w, BytesStart::new("worksheet").with_attributes([("xmlns", NS_MAIN)]))?;
    start(&mut w, BytesStart::new("sheetData"))?;

    let header_cells: Vec<CellValue> = table
        .headers
        .iter()
        .map(|h| CellValue::Text(h.clone()))
        .collect();
    let header = (!header_cells.is_empty()).then_some((header_cells.as_slice(), Some("1")));
    let body = table.rows.iter().map(|r| (r.as_slice(), None));

    for (row_idx, (cells, style)) in header.into_iter().chain(body).enumerate() {
        let r = (row_idx + 1).to_string();
        start(&mut w, BytesStart::new("row").with_attributes([("r", r.as_str())]))?;
        for (col, value) in cells.iter().enumerate() {
            let reference = format!("{}{}", column_name(col), r);
            write_cell(&mut w, &reference, value, style)?;
        }
        end(&mut w, "row")?;
    }

    end(&mut w, "sheetData")?;
    end(&mut w, "worksheet")?;
    Ok(finish(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{open_workbook_auto_from_rs, Data, Reader};
    use pretty_assertions::assert_eq;

    fn table(name: &str, headers: &[&str], rows: Vec<Vec<CellValue>>) -> ExtractedTable {
        ExtractedTable {
            sheet_name: name.into(),
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn namer_sanitises_truncates_and_dedupes() {
        let mut n = SheetNamer::new();
        assert_eq!(n.assign("Q1/Q2: [draft]"), "Q1_Q2_ _draft_");
        assert_eq!(n.assign("   "), "Sheet");
        assert_eq!(n.assign("sheet"), "sheet_2");
        let long = "A".repeat(40);
        let first = n.assign(&long);
        let second = n.assign(&long);
        assert_eq!(first.chars().count(), 31);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with("_2"));
        assert_ne!(first, second);
    }

    #[test]
    fn zero_tables_is_an_error() {
        assert!(matches!(tables_to_xlsx(&[]), Err(DocMorphError::Synthesis(_))));
    }

    #[test]
    fn workbook_reads_back_with_calamine() {
        let tables = vec![
            table(
                "Revenue",
                &["Region", "Q1"],
                vec![
                    vec!["North".into(), CellValue::Number(1200.5)],
                    vec!["South & <East>".into()],
                ],
            ),
            table("Revenue", &["x"], vec![vec![CellValue::Bool(true)]]),
        ];
        let doc = tables_to_xlsx(&tables).unwrap();
        let mut wb = open_workbook_auto_from_rs(Cursor::new(doc.bytes)).unwrap();
        assert_eq!(wb.sheet_names(), vec!["Revenue".to_string(), "Revenue_2".to_string()]);

        let range = wb.worksheet_range("Revenue").unwrap();
        let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();
        assert_eq!(rows[0][0], Data::String("Region".into()));
        assert_eq!(rows[1][1], Data::Float(1200.5));
        assert_eq!(rows[2][0], Data::String("South & <East>".into()));

        let second = wb.worksheet_range("Revenue_2").unwrap();
        assert_eq!(second.get_value((1, 0)), Some(&Data::Bool(true)));
    }

    #[test]
    fn ragged_rows_are_kept() {
        let t = table(
            "R",
            &["a", "b", "c"],
            vec![vec!["1".into()], vec!["1".into(), "2".into(), "3".into(), "4".into()]],
        );
        let doc = tables_to_xlsx(&[t]).unwrap();
        let mut wb = open_workbook_auto_from_rs(Cursor::new(doc.bytes)).unwrap();
        let range = wb.worksheet_range("R").unwrap();
        assert_eq!(range.get_value((2, 3)), Some(&Data::String("4".into())));
    }
}
