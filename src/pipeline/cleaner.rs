//! OCR artifact cleanup for provider text before it is sent to the semantic provider.

/// Checkbox state markers emitted by layout providers and scanners.
const CHECKBOX_MARKERS: &[&str] = &[":selected:", ":unselected:", "☐", "☑", "☒", "■", "□"];

/// Clean OCR output: strip control and null characters, remove checkbox
/// markers, collapse repeated spaces and blank lines.
pub fn clean_ocr_text(raw: &str) -> String {
    let mut text: String = raw
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect();

    for marker in CHECKBOX_MARKERS {
        if text.contains(marker) {
            text = text.replace(marker, "");
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = collapse_spaces(line);
        if line.is_empty() {
            blank_run += 1;
            // One blank line survives to keep paragraph breaks
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        out.push_str(&line);
        out.push('\n');
    }

    out.trim_end().to_string()
}

/// Collapse runs of spaces/tabs into one space and trim the line.
fn collapse_spaces(line: &str) -> String {
    line.split([' ', '\t'])
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_bytes() {
        let clean = clean_ocr_text("Kurum\x00 Adı");
        assert!(!clean.contains('\x00'));
        assert_eq!(clean, "Kurum Adı");
    }

    #[test]
    fn strips_control_characters() {
        let clean = clean_ocr_text("Tutar: 1.250.000 TL\x01\x02\x0B\nTarih: 15.03.2025");
        assert_eq!(clean, "Tutar: 1.250.000 TL\nTarih: 15.03.2025");
    }

    #[test]
    fn removes_checkbox_markers() {
        let clean = clean_ocr_text(":selected: Kahvaltı :unselected: Öğle ☒ Akşam");
        assert_eq!(clean, "Kahvaltı Öğle Akşam");
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(clean_ocr_text("Geçici   teminat \t\t %3"), "Geçici teminat %3");
    }

    #[test]
    fn collapses_blank_lines_to_one() {
        let clean = clean_ocr_text("Line one\n\n\n\n  \nLine two\n\n\nLine three");
        assert_eq!(clean, "Line one\n\nLine two\n\nLine three");
    }

    #[test]
    fn leading_blank_lines_dropped() {
        assert_eq!(clean_ocr_text("\n\n\nTitle"), "Title");
    }

    #[test]
    fn preserves_turkish_characters_and_punctuation() {
        let raw = "İhale Kayıt No: 2025/123456 — Yaklaşık maliyet: 45.000.000,00 ₺ (%3)";
        assert_eq!(clean_ocr_text(raw), raw);
    }

    #[test]
    fn empty_and_control_only_inputs() {
        assert_eq!(clean_ocr_text(""), "");
        assert_eq!(clean_ocr_text("\x00\x01\x02"), "");
    }
}
