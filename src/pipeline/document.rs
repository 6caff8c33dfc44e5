use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Rejections raised before any provider is contacted. Never retried.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Archive containers cannot be analyzed directly (.{0}); extract the documents first")]
    UnsupportedContainer(String),

    #[error("Unsupported document format: .{0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad document categories, decided from the extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentClass {
    /// Scanned PDF or image: text must come from an OCR/layout provider.
    OcrRequired,
    /// Office or text format the local extractor can read.
    LocalText,
    /// Archive; never unpacked.
    Container,
    Unsupported,
}

impl DocumentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OcrRequired => "ocr_required",
            Self::LocalText => "local_text",
            Self::Container => "container",
            Self::Unsupported => "unsupported",
        }
    }
}

const OCR_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif", "webp", "heic",
];

const LOCAL_EXTENSIONS: &[&str] = &[
    "txt", "md", "csv", "tsv", "json", "xml", "html", "htm", "rtf", "doc", "docx", "odt", "xls",
    "xlsx", "ods", "ppt", "pptx",
];

const CONTAINER_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "xz"];

/// Classify a file extension via the static table. No content sniffing.
pub fn classify_extension(extension: &str) -> DocumentClass {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if OCR_EXTENSIONS.contains(&ext.as_str()) {
        DocumentClass::OcrRequired
    } else if LOCAL_EXTENSIONS.contains(&ext.as_str()) {
        DocumentClass::LocalText
    } else if CONTAINER_EXTENSIONS.contains(&ext.as_str()) {
        DocumentClass::Container
    } else {
        DocumentClass::Unsupported
    }
}

/// Lowercase extension of a path, without the dot. Empty when absent.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// The document under analysis. Built once per run, immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRef {
    pub path: PathBuf,
    pub display_name: String,
    pub byte_size: u64,
    pub extension: String,
    pub ocr_required: bool,
}

impl DocumentRef {
    /// Validate a path and build its reference.
    ///
    /// Missing files, archives and unknown extensions are rejected here so that
    /// no provider budget is spent on them.
    pub fn open(path: &Path) -> Result<Self, InputError> {
        if !path.is_file() {
            return Err(InputError::NotFound(path.to_path_buf()));
        }

        let extension = extension_of(path);
        let ocr_required = match classify_extension(&extension) {
            DocumentClass::OcrRequired => true,
            DocumentClass::LocalText => false,
            DocumentClass::Container => return Err(InputError::UnsupportedContainer(extension)),
            DocumentClass::Unsupported => return Err(InputError::UnsupportedFormat(extension)),
        };

        let byte_size = std::fs::metadata(path)?.len();

        Ok(Self {
            path: path.to_path_buf(),
            display_name: display_name(path),
            byte_size,
            extension,
            ocr_required,
        })
    }

    /// Size in KiB, rounded, for reports.
    pub fn size_kb(&self) -> u64 {
        (self.byte_size + 512) / 1024
    }

    /// Read the whole file. Providers receive the bytes, never the path.
    pub fn read_bytes(&self) -> Result<Vec<u8>, InputError> {
        Ok(std::fs::read(&self.path)?)
    }

    /// MIME type guessed from the extension, for document attachments.
    pub fn media_type(&self) -> String {
        mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// File name without directories, capped at 255 characters.
fn display_name(path: &Path) -> String {
    let name: String = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .chars()
        .take(255)
        .collect();

    if name.is_empty() {
        "document".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanned_formats_require_ocr() {
        for ext in OCR_EXTENSIONS {
            assert_eq!(classify_extension(ext), DocumentClass::OcrRequired, "{ext}");
        }
    }

    #[test]
    fn office_formats_are_local() {
        for ext in LOCAL_EXTENSIONS {
            assert_eq!(classify_extension(ext), DocumentClass::LocalText, "{ext}");
        }
    }

    #[test]
    fn classification_is_case_insensitive_and_ignores_dot() {
        assert_eq!(classify_extension(".PDF"), DocumentClass::OcrRequired);
        assert_eq!(classify_extension("Docx"), DocumentClass::LocalText);
        assert_eq!(classify_extension("ZIP"), DocumentClass::Container);
    }

    #[test]
    fn classification_is_idempotent() {
        for ext in ["pdf", "docx", "zip", "exe", "jpeg", ""] {
            assert_eq!(classify_extension(ext), classify_extension(ext));
        }
    }

    #[test]
    fn open_missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = DocumentRef::open(&dir.path().join("absent.pdf")).unwrap_err();
        assert!(matches!(err, InputError::NotFound(_)));
    }

    #[test]
    fn open_zip_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        std::fs::write(&path, b"PK\x03\x04").unwrap();
        let err = DocumentRef::open(&path).unwrap_err();
        assert!(matches!(err, InputError::UnsupportedContainer(ref e) if e == "zip"));
    }

    #[test]
    fn open_unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.exe");
        std::fs::write(&path, b"MZ").unwrap();
        let err = DocumentRef::open(&path).unwrap_err();
        assert!(matches!(err, InputError::UnsupportedFormat(_)));
    }

    #[test]
    fn open_builds_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Idari_Sartname.PDF");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        let doc = DocumentRef::open(&path).unwrap();
        assert_eq!(doc.display_name, "Idari_Sartname.PDF");
        assert_eq!(doc.extension, "pdf");
        assert_eq!(doc.byte_size, 2048);
        assert_eq!(doc.size_kb(), 2);
        assert!(doc.ocr_required);
        assert_eq!(doc.media_type(), "application/pdf");
    }

    #[test]
    fn text_document_is_not_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(!DocumentRef::open(&path).unwrap().ocr_required);
    }
}
