//! Reference list splitting.

use once_cell::sync::Lazy;
use regex::Regex;

use paperflow_core::SegmentType;

use crate::section::SectionSegmenter;

/// Start of a new list entry: `[12]`, `(12)` or `12.`.
static ENTRY_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\[\d{1,3}\]|\(\d{1,3}\)|\d{1,3}\.)(?:\s|$)").unwrap());

/// Headings that end the reference list.
static SECTION_END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[A-Z]\.?\s+)?(?:appendix|appendices|acknowledge?ments?|supplementary\s+materials?)\b",
    )
    .unwrap()
});

static BLANK_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Entries of the last reference section, using the built-in heading rules.
pub fn extract_references(text: &str) -> Vec<String> {
    let segmenter = SectionSegmenter::new();
    extract_with(text, |line| {
        segmenter.classify_line(line) == Some(SegmentType::Reference)
    })
}

/// Entries of the section after the last line for which `is_heading` holds.
///
/// Numbered lists are split on their markers; unnumbered lists fall back to
/// blank-line separation. Whitespace inside an entry is collapsed.
pub fn extract_with(text: &str, is_heading: impl Fn(&str) -> bool) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let Some(start) = lines.iter().rposition(|line| is_heading(line)) else {
        return Vec::new();
    };

    let body: Vec<&str> = lines[start + 1..]
        .iter()
        .copied()
        .take_while(|line| !SECTION_END_RE.is_match(line))
        .collect();

    let numbered = body.iter().any(|line| ENTRY_START_RE.is_match(line));
    let entries: Vec<String> = if numbered {
        split_numbered(&body)
    } else {
        BLANK_LINE_RE
            .split(&body.join("\n"))
            .map(collapse)
            .filter(|e| !e.is_empty())
            .collect()
    };

    tracing::debug!(count = entries.len(), numbered, "extracted references");
    entries
}

fn split_numbered(body: &[&str]) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    for line in body {
        if ENTRY_START_RE.is_match(line) {
            let done = collapse(&current);
            if !done.is_empty() {
                entries.push(done);
            }
            current.clear();
        }
        current.push_str(line);
        current.push(' ');
    }
    let done = collapse(&current);
    if !done.is_empty() {
        entries.push(done);
    }
    entries
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bracketed_entries_after_last_heading() {
        let text = "Introduction\nSee references below.\nReferences\n[1] A. Smith. Paper one.\nJournal X, 2020.\n[2] B. Jones. Paper two. 2021.\n";
        let refs = extract_references(text);
        assert_eq!(
            refs,
            vec![
                "[1] A. Smith. Paper one. Journal X, 2020.",
                "[2] B. Jones. Paper two. 2021."
            ]
        );
    }

    #[test]
    fn uses_the_last_reference_heading() {
        let text = "References\n[1] early\nMethods\nbody\nReferences\n1. Late entry.\n2. Another.";
        let refs = extract_references(text);
        assert_eq!(refs, vec!["1. Late entry.", "2. Another."]);
    }

    #[test]
    fn stops_at_appendix() {
        let text = "References\n(1) First.\n(2) Second.\nAppendix\nA proof.";
        let refs = extract_references(text);
        assert_eq!(refs, vec!["(1) First.", "(2) Second."]);
    }

    #[test]
    fn unnumbered_entries_split_on_blank_lines() {
        let text = "Bibliography\nSmith, A. (2020). One.\n\nJones, B. (2021). Two\ncontinued.";
        let refs = extract_references(text);
        assert_eq!(refs, vec!["Smith, A. (2020). One.", "Jones, B. (2021). Two continued."]);
    }

    #[test]
    fn no_heading_no_references() {
        assert!(extract_references("Introduction\n[1] not a list").is_empty());
    }
}
