//! Segmentation of whole papers in the layouts seen in extracted arXiv text.

use paperflow_core::{Metadata, SegmentType};
use paperflow_parsing::{SectionSegmenter, normalize_extracted_text};
use uuid::Uuid;

fn types(text: &str, abstract_text: Option<&str>) -> Vec<SegmentType> {
    let segmenter = SectionSegmenter::new();
    let segments =
        segmenter.segment_document(Uuid::new_v4(), abstract_text, &Metadata::new(), text);
    for (i, seg) in segments.iter().enumerate() {
        assert_eq!(seg.position, i);
        assert!(!seg.content.trim().is_empty());
    }
    segments.into_iter().map(|s| s.segment_type).collect()
}

const IEEE_LAYOUT: &str = "\
I. INTRODUCTION
Large language models are increasingly deployed as agents.

II. RELATED WORK
Prior agent benchmarks focus on single-turn tasks.

III. METHODOLOGY
We construct a benchmark of multi-step tool use.

IV. EVALUATION
We evaluate seven open models on the benchmark.

V. CONCLUSION
Multi-step tool use remains challenging.

REFERENCES
[1] A. Vaswani et al. Attention is all you need. 2017.
[2] T. Brown et al. Language models are few-shot learners. 2020.
[3] J. Wei et al. Chain-of-thought prompting. 2022.
";

#[test]
fn roman_numbered_upper_case_headings() {
    assert_eq!(
        types(IEEE_LAYOUT, Some("We study tool-using agents.")),
        vec![
            SegmentType::Abstract,
            SegmentType::Introduction,
            SegmentType::Background,
            SegmentType::Method,
            SegmentType::Experiment,
            SegmentType::Conclusion,
            SegmentType::Reference,
        ]
    );
}

#[test]
fn reference_entries_of_ieee_layout() {
    let refs = SectionSegmenter::new().extract_references(IEEE_LAYOUT);
    assert_eq!(refs.len(), 3);
    assert!(refs[0].contains("Attention is all you need"));
    assert!(refs[2].contains("Chain-of-thought"));
}

#[test]
fn japanese_headings() {
    let text = "\
1 はじめに
本研究では量子誤り訂正を扱う。
2 提案手法
表面符号を用いる。
3 実験
シミュレーションを行った。
4 実験結果
論理誤り率が低下した。
5 おわりに
今後の課題を述べる。
参考文献
[1] 山田太郎. 量子計算入門. 2020.
";
    assert_eq!(
        types(text, None),
        vec![
            SegmentType::Introduction,
            SegmentType::Method,
            SegmentType::Experiment,
            SegmentType::Result,
            SegmentType::Conclusion,
            SegmentType::Reference,
        ]
    );
}

#[test]
fn crlf_text_segments_after_normalization() {
    let raw = "1. Introduction\r\nQuantum annealing is studied.\r\n\r\n\r\n\r\n2. Results\r\nThe annealer wins on small instances.\r\n\x0c3. Discussion\r\nScaling is unclear.\r\n";
    let text = normalize_extracted_text(raw);
    assert!(!text.contains('\r'));
    assert!(!text.contains("\n\n\n"));
    assert_eq!(
        types(&text, Some("Annealing benchmarks.")),
        vec![
            SegmentType::Abstract,
            SegmentType::Introduction,
            SegmentType::Result,
            SegmentType::Discussion,
        ]
    );
}

const TWO_HEADINGS: &str = "\
Introduction
Surface codes protect logical qubits against local noise on planar chips.

Conclusion
Larger code distances suppress logical errors at the cost of more qubits.

Decoding latency remains the main obstacle for real-time error correction.
";

#[test]
fn two_headings_without_abstract_fall_back_to_paragraphs() {
    assert_eq!(
        types(TWO_HEADINGS, None),
        vec![
            SegmentType::Introduction,
            SegmentType::Conclusion,
            SegmentType::Paragraph,
            SegmentType::Paragraph,
            SegmentType::Paragraph,
        ]
    );
}

#[test]
fn abstract_counts_toward_the_structural_threshold() {
    assert_eq!(
        types(TWO_HEADINGS, Some("Surface code scaling.")),
        vec![
            SegmentType::Abstract,
            SegmentType::Introduction,
            SegmentType::Conclusion,
        ]
    );
}
