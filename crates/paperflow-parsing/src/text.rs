use once_cell::sync::Lazy;
use regex::Regex;

static EXCESS_NEWLINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Clean up raw extractor output before segmentation.
///
/// Line endings become `\n`, form feeds become page breaks, and runs of
/// three or more newlines collapse to one blank line.
pub fn normalize_extracted_text(text: &str) -> String {
    let unified = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{0C}', "\n\n");
    EXCESS_NEWLINES_RE
        .replace_all(&unified, "\n\n")
        .into_owned()
}
