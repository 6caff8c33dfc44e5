//! Local text extraction for text, markup and office formats.
//!
//! Open XML (docx, pptx, xlsx), OpenDocument (odt, ods) and legacy xls are
//! read without any network call. Legacy doc and ppt binaries surface as
//! `UnsupportedLocalFormat`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::office;
use super::types::{LocalExtraction, LocalExtractor};
use super::ProviderError;
use crate::pipeline::document::extension_of;

static SCRIPT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").unwrap());
static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/tr|/li|/h[1-6])\b[^>]*>").unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static RTF_CONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?|\\'[0-9a-fA-F]{2}|[{}]").unwrap());
static RTF_PAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\par\b ?").unwrap());
static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl LocalExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<LocalExtraction, ProviderError> {
        let extension = extension_of(path);
        let kind = match extension.as_str() {
            "txt" | "md" | "csv" | "tsv" | "json" | "xml" => "text",
            "html" | "htm" => "html",
            "rtf" => "rtf",
            "docx" => "docx",
            "pptx" => "pptx",
            "odt" => "odt",
            "xlsx" | "xls" | "ods" => "spreadsheet",
            _ => return Err(ProviderError::UnsupportedLocalFormat(extension)),
        };

        let bytes = std::fs::read(path)?;
        let text = match kind {
            "docx" => office::docx_text(&bytes)?,
            "pptx" => office::pptx_text(&bytes)?,
            "odt" => office::odt_text(&bytes)?,
            "spreadsheet" => office::spreadsheet_text(&bytes)?,
            "html" => html_to_text(&String::from_utf8_lossy(&bytes)),
            "rtf" => rtf_to_text(&String::from_utf8_lossy(&bytes)),
            _ => String::from_utf8_lossy(&bytes).into_owned(),
        };

        tracing::debug!(
            path = %path.display(),
            kind,
            chars = text.chars().count(),
            "Local extraction finished"
        );

        Ok(LocalExtraction {
            text,
            kind: kind.to_string(),
            needs_ocr: false,
        })
    }
}

fn html_to_text(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, " ");
    let text = BLOCK_TAG.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    tidy(&text)
}

fn rtf_to_text(rtf: &str) -> String {
    let text = RTF_PAR.replace_all(rtf, "\n");
    tidy(&RTF_CONTROL.replace_all(&text, ""))
}

fn tidy(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|l| INLINE_SPACE.replace_all(l.trim(), " ").into_owned())
        .collect();
    BLANK_LINES
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn reads_plain_text_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "ilan.txt", "İhale kayıt numarası: 2025/123456");
        let out = PlainTextExtractor::new().extract(&path).unwrap();
        assert_eq!(out.text, "İhale kayıt numarası: 2025/123456");
        assert_eq!(out.kind, "text");
        assert!(!out.needs_ocr);
    }

    #[test]
    fn strips_html_markup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "ilan.html",
            "<html><head><style>p{color:red}</style></head><body><h1>Yemek Hizmeti</h1>\
             <p>Tahmini bedel &amp; teminat</p><script>var x = 1;</script></body></html>",
        );
        let out = PlainTextExtractor::new().extract(&path).unwrap();
        assert_eq!(out.kind, "html");
        assert!(out.text.contains("Yemek Hizmeti"));
        assert!(out.text.contains("Tahmini bedel & teminat"));
        assert!(!out.text.contains("color"));
        assert!(!out.text.contains("var x"));
    }

    #[test]
    fn strips_rtf_control_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "not.rtf", r"{\rtf1\ansi{\b Teknik} Şartname\par Madde 1}");
        let out = PlainTextExtractor::new().extract(&path).unwrap();
        assert!(out.text.contains("Teknik Şartname"));
        assert!(out.text.contains("Madde 1"));
        assert!(!out.text.contains("rtf1"));
    }

    #[test]
    fn reads_word_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sartname.docx");
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Tahmini bedel: 1.250.000 TL</w:t></w:r></w:p>
        </w:body></w:document>"#;
        std::fs::write(&path, office::zip_of(&[("word/document.xml", xml)])).unwrap();

        let out = PlainTextExtractor::new().extract(&path).unwrap();
        assert_eq!(out.kind, "docx");
        assert!(out.text.contains("Tahmini bedel: 1.250.000 TL"));
    }

    #[test]
    fn corrupt_office_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "sartname.docx", "PK");
        let err = PlainTextExtractor::new().extract(&path).unwrap_err();
        assert!(matches!(err, ProviderError::DocumentRead(_)));
    }

    #[test]
    fn legacy_word_binaries_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "sartname.doc", "binary");
        let err = PlainTextExtractor::new().extract(&path).unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedLocalFormat(ext) if ext == "doc"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PlainTextExtractor::new()
            .extract(Path::new("/nonexistent/ilan.txt"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Io(_)));
    }
}
