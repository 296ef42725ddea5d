use std::io::Write;

use owo_colors::OwoColorize;

use paperflow_core::{PaperMetadata, Segment};
use paperflow_ingest::{PaperOutcome, PaperStatus};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn shorten(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

/// Print one paper's metadata as a short block.
pub fn print_paper(
    w: &mut dyn Write,
    index: usize,
    paper: &PaperMetadata,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{}. {} [{}]", index + 1, paper.title.bold(), paper.id.cyan())?;
    } else {
        writeln!(w, "{}. {} [{}]", index + 1, paper.title, paper.id)?;
    }
    writeln!(w, "   Authors:    {}", paper.authors.join(", "))?;
    writeln!(
        w,
        "   Published:  {}   Categories: {}",
        paper.published,
        paper.categories.join(", ")
    )?;
    if let Some(ref doi) = paper.doi {
        writeln!(w, "   DOI:        {}", doi)?;
    }
    writeln!(w, "   PDF:        {}", paper.pdf_url)?;
    let summary = shorten(&paper.abstract_text, 240);
    if color.enabled() {
        writeln!(w, "   {}", summary.dimmed())?;
    } else {
        writeln!(w, "   {}", summary)?;
    }
    writeln!(w)?;
    Ok(())
}

fn status_label(status: PaperStatus, color: ColorMode) -> String {
    let label = match status {
        PaperStatus::Success => "SUCCESS",
        PaperStatus::Partial => "PARTIAL",
        PaperStatus::Failed => "FAILED",
    };
    if !color.enabled() {
        return label.to_string();
    }
    match status {
        PaperStatus::Success => label.green().to_string(),
        PaperStatus::Partial => label.yellow().to_string(),
        PaperStatus::Failed => label.red().to_string(),
    }
}

/// Print the result of one paper's chain.
pub fn print_outcome(
    w: &mut dyn Write,
    outcome: &PaperOutcome,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(
        w,
        "{} {} \"{}\"",
        status_label(outcome.status, color),
        outcome.id,
        shorten(&outcome.title, 70)
    )?;
    if outcome.status != PaperStatus::Failed {
        writeln!(
            w,
            "   {} chars, {} segments, {} entities, {} relations, {} references",
            outcome.text_length,
            outcome.segments_count,
            outcome.entity_ids.len(),
            outcome.relation_ids.len(),
            outcome.references_count
        )?;
    }
    if let Some(ref path) = outcome.metadata_path {
        writeln!(w, "   metadata: {}", path.display())?;
    }
    for err in &outcome.errors {
        let stage = err.stage.map(|s| s.as_str()).unwrap_or("-");
        if color.enabled() {
            writeln!(w, "   {} {}", format!("[{stage}]").red(), err.message)?;
        } else {
            writeln!(w, "   [{stage}] {}", err.message)?;
        }
    }
    Ok(())
}

/// Print totals for a collection run.
pub fn print_summary(
    w: &mut dyn Write,
    outcomes: &[PaperOutcome],
    color: ColorMode,
) -> std::io::Result<()> {
    let count = |status| outcomes.iter().filter(|o| o.status == status).count();
    let (success, partial, failed) = (
        count(PaperStatus::Success),
        count(PaperStatus::Partial),
        count(PaperStatus::Failed),
    );
    let segments: usize = outcomes.iter().map(|o| o.segments_count).sum();

    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Summary".bold())?;
    } else {
        writeln!(w, "Summary")?;
    }
    writeln!(w, "  Papers:    {}", outcomes.len())?;
    writeln!(w, "  Succeeded: {}", success)?;
    writeln!(w, "  Partial:   {}", partial)?;
    writeln!(w, "  Failed:    {}", failed)?;
    writeln!(w, "  Segments:  {}", segments)?;
    Ok(())
}

/// Print segments produced by offline segmentation.
pub fn print_segments(
    w: &mut dyn Write,
    segments: &[Segment],
    references: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    for seg in segments {
        let kind = format!("{:<13}", seg.segment_type.as_str());
        let preview = shorten(&seg.content, 80);
        if color.enabled() {
            writeln!(w, "{:>3} {} {}", seg.position, kind.cyan(), preview)?;
        } else {
            writeln!(w, "{:>3} {} {}", seg.position, kind, preview)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{} segments, {} references", segments.len(), references)?;
    Ok(())
}
