//! Input loading: validate a batch against the conversion kind, then read it.
//!
//! Validation runs over the whole batch before a single byte is read, so a
//! bad file in position five fails the job without touching files one to
//! four. Reads then fan out through a bounded pool and come back in the
//! caller's order.

use crate::error::DocMorphError;
use crate::kind::ConversionKind;
use crate::types::SourceAsset;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One input handed to the pipeline.
#[derive(Debug, Clone)]
pub enum InputFile {
    /// A file on disk; the mime type is guessed from the extension.
    Path(PathBuf),
    /// An in-memory upload.
    Bytes {
        name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    },
}

impl InputFile {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        InputFile::Path(path.into())
    }

    pub fn bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        InputFile::Bytes {
            name: name.into(),
            mime_type: None,
            data,
        }
    }

    /// Attach a declared mime type (in-memory inputs only).
    pub fn with_mime(self, mime: impl Into<String>) -> Self {
        match self {
            InputFile::Bytes { name, data, .. } => InputFile::Bytes {
                name,
                mime_type: Some(mime.into()),
                data,
            },
            other => other,
        }
    }

    /// Display name: the file name for paths, the given name otherwise.
    pub fn name(&self) -> String {
        match self {
            InputFile::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            InputFile::Bytes { name, .. } => name.clone(),
        }
    }

    /// Declared mime type, falling back to a guess from the name.
    pub fn mime_type(&self) -> String {
        match self {
            InputFile::Bytes {
                mime_type: Some(m), ..
            } if !m.is_empty() => m.clone(),
            _ => guess_mime(&self.name()),
        }
    }
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(Path::new(name))
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_default()
}

/// Check every file against the kind's format predicate and the kind's
/// input count. Nothing is read.
pub fn validate_inputs(kind: ConversionKind, files: &[InputFile]) -> Result<(), DocMorphError> {
    if files.is_empty() {
        return Err(DocMorphError::InvalidInput("no input files were supplied".into()));
    }
    if kind.single_input() && files.len() > 1 {
        return Err(DocMorphError::InvalidInput(format!(
            "{kind} takes exactly one file, got {}",
            files.len()
        )));
    }
    for file in files {
        let name = file.name();
        let mime = file.mime_type();
        if !kind.accepts(&name, &mime) {
            let reason = if mime.is_empty() {
                "unrecognised type".to_string()
            } else {
                mime
            };
            return Err(DocMorphError::UnsupportedFormat { file: name, reason });
        }
    }
    Ok(())
}

/// Validate, then read all files with at most `concurrency` reads in flight.
pub async fn load_assets(
    kind: ConversionKind,
    files: &[InputFile],
    concurrency: usize,
) -> Result<Vec<SourceAsset>, DocMorphError> {
    validate_inputs(kind, files)?;
    info!("Loading {} input file(s) for {}", files.len(), kind);

    let assets: Vec<SourceAsset> = stream::iter(files.iter().cloned())
        .map(read_one)
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    if kind.pdf_input() {
        for asset in &assets {
            check_pdf_magic(asset)?;
        }
    }
    Ok(assets)
}

async fn read_one(file: InputFile) -> Result<SourceAsset, DocMorphError> {
    let name = file.name();
    let mime_type = file.mime_type();
    let data = match file {
        InputFile::Path(path) => tokio::fs::read(&path)
            .await
            .map_err(|source| DocMorphError::Io { path, source })?,
        InputFile::Bytes { data, .. } => data,
    };
    debug!("Read '{}' ({} bytes, {})", name, data.len(), mime_type);
    Ok(SourceAsset {
        name,
        mime_type,
        data,
    })
}

fn check_pdf_magic(asset: &SourceAsset) -> Result<(), DocMorphError> {
    if asset.data.starts_with(b"%PDF") {
        return Ok(());
    }
    let head: Vec<u8> = asset.data.iter().take(4).copied().collect();
    Err(DocMorphError::UnsupportedFormat {
        file: asset.name.clone(),
        reason: format!("not a PDF (starts with {head:?})"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(InputFile::path("/tmp/a.png").mime_type(), "image/png");
        assert_eq!(InputFile::bytes("scan.jpg", vec![]).mime_type(), "image/jpeg");
        assert_eq!(
            InputFile::bytes("blob", vec![]).with_mime("image/webp").mime_type(),
            "image/webp"
        );
    }

    #[test]
    fn one_bad_file_fails_the_batch() {
        let files = vec![
            InputFile::bytes("a.png", vec![1]),
            InputFile::bytes("b.txt", vec![2]),
        ];
        let err = validate_inputs(ConversionKind::ImageToPdf, &files).unwrap_err();
        match err {
            DocMorphError::UnsupportedFormat { file, .. } => assert_eq!(file, "b.txt"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn count_rules() {
        assert!(matches!(
            validate_inputs(ConversionKind::CompressPdf, &[]),
            Err(DocMorphError::InvalidInput(_))
        ));
        let two = vec![
            InputFile::bytes("a.pdf", vec![]),
            InputFile::bytes("b.pdf", vec![]),
        ];
        assert!(matches!(
            validate_inputs(ConversionKind::PdfToSpreadsheet, &two),
            Err(DocMorphError::InvalidInput(_))
        ));
        assert!(validate_inputs(ConversionKind::CompressPdf, &two).is_ok());
    }

    #[tokio::test]
    async fn load_preserves_order() {
        let files: Vec<InputFile> = (0..9)
            .map(|i| InputFile::bytes(format!("p{i}.png"), vec![i as u8]))
            .collect();
        let assets = load_assets(ConversionKind::ImageToPdf, &files, 3).await.unwrap();
        let bytes: Vec<u8> = assets.iter().map(|a| a.data[0]).collect();
        assert_eq!(bytes, (0..9).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn pdf_magic_is_checked() {
        let files = vec![InputFile::bytes("fake.pdf", b"PK\x03\x04".to_vec())];
        let err = load_assets(ConversionKind::CompressPdf, &files, 1).await.unwrap_err();
        assert!(matches!(err, DocMorphError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn missing_path_is_io_error() {
        let files = vec![InputFile::path("/definitely/not/here.pdf")];
        let err = load_assets(ConversionKind::CompressPdf, &files, 1).await.unwrap_err();
        assert!(matches!(err, DocMorphError::Io { .. }));
    }
}
