//! Bundle per-file outputs into a single ZIP.

use crate::error::DocMorphError;
use crate::output::SynthesizedDocument;
use crate::types::file_stem;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Suffix appended to each compressed PDF's stem inside a batch archive.
pub const LITE_SUFFIX: &str = "_lite.pdf";

/// Archive entry name for the source file `source_name`.
pub fn lite_entry_name(source_name: &str) -> String {
    format!("{}{}", file_stem(source_name), LITE_SUFFIX)
}

/// Write `entries` (name, bytes) into a deflate ZIP, in order.
///
/// Colliding names get `_2`, `_3`, … before the extension, so the archive
/// always holds exactly `entries.len()` files.
pub fn archive_outputs(entries: &[(String, Vec<u8>)]) -> Result<SynthesizedDocument, DocMorphError> {
    if entries.is_empty() {
        return Err(DocMorphError::Synthesis("nothing to archive".into()));
    }

    let zip_err = |e: zip::result::ZipError| DocMorphError::Synthesis(format!("zip: {e}"));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut used = HashSet::new();

    for (name, bytes) in entries {
        let unique = unique_name(name, &mut used);
        debug!("Archiving '{}' ({} bytes)", unique, bytes.len());
        zip.start_file(unique.as_str(), options).map_err(zip_err)?;
        zip.write_all(bytes)
            .map_err(|e| DocMorphError::Synthesis(format!("zip write: {e}")))?;
    }

    let bytes = zip.finish().map_err(zip_err)?.into_inner();
    Ok(SynthesizedDocument::new(bytes))
}

fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    let mut candidate = name.to_string();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{stem}_{n}{ext}");
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_back(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                file.read_to_end(&mut data).unwrap();
                (file.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn entry_names_use_the_source_stem() {
        assert_eq!(lite_entry_name("report.pdf"), "report_lite.pdf");
        assert_eq!(lite_entry_name("scan.v2.PDF"), "scan.v2_lite.pdf");
    }

    #[test]
    fn entries_keep_order_and_content() {
        let entries = vec![
            ("a_lite.pdf".to_string(), b"%PDF-a".to_vec()),
            ("b_lite.pdf".to_string(), b"%PDF-b".to_vec()),
        ];
        let doc = archive_outputs(&entries).unwrap();
        assert_eq!(read_back(&doc.bytes), entries);
    }

    #[test]
    fn duplicate_names_are_numbered() {
        let entries = vec![
            ("x_lite.pdf".to_string(), vec![1]),
            ("x_lite.pdf".to_string(), vec![2]),
            ("x_lite.pdf".to_string(), vec![3]),
        ];
        let names: Vec<String> = read_back(&archive_outputs(&entries).unwrap().bytes)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, ["x_lite.pdf", "x_lite_2.pdf", "x_lite_3.pdf"]);
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            archive_outputs(&[]),
            Err(DocMorphError::Synthesis(_))
        ));
    }
}
