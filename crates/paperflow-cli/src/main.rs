use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use paperflow_core::{Config, Metadata, RateLimitedClient, SearchQuery};
use paperflow_ingest::{ArxivConnector, Pipeline, ProgressEvent};
use paperflow_parsing::{SectionSegmenter, SegmenterConfigBuilder, normalize_extracted_text};
use paperflow_pdf_mupdf::MupdfBackend;

mod output;
mod settings;

use output::ColorMode;
use settings::Overrides;

/// paperflow - collect and segment arXiv papers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log debug output (overridden by PAPERFLOW_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// Free-text search terms (arXiv field queries like `ti:graph` pass through)
    #[arg(default_value = "")]
    query: String,

    /// Restrict to one arXiv category, e.g. cs.AI
    #[arg(long)]
    category: Option<String>,

    /// Earliest submission date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// Latest submission date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<String>,

    /// Maximum number of papers
    #[arg(long, default_value_t = paperflow_core::models::DEFAULT_MAX_RESULTS)]
    max: usize,
}

impl QueryArgs {
    fn to_query(&self) -> SearchQuery {
        let mut query = SearchQuery::new(self.query.clone())
            .with_dates(self.from.clone(), self.to.clone())
            .with_max_results(self.max);
        if let Some(ref category) = self.category {
            query = query.with_category(category.clone());
        }
        query
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search for papers and print their metadata
    Search {
        #[command(flatten)]
        query: QueryArgs,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch one paper by id
    Fetch {
        /// arXiv id, with or without version suffix
        id: String,

        /// Print metadata as JSON
        #[arg(long)]
        json: bool,

        /// Also download, extract and segment the paper
        #[arg(long)]
        process: bool,

        /// Directory for raw PDFs and processed metadata
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Search, then download, extract, segment and derive entities for every hit
    Collect {
        #[command(flatten)]
        query: QueryArgs,

        /// Directory for raw PDFs and processed metadata
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Papers processed concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Segment an already-extracted text file offline
    Segment {
        /// Path to a UTF-8 text file
        file: PathBuf,

        /// Abstract to place at position 0
        #[arg(long = "abstract")]
        abstract_text: Option<String>,

        /// Print segments as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or save the resolved configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the configuration after merging files and environment
    Show,
    /// Write the merged configuration to the platform config file
    Save,
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("PAPERFLOW_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let color = ColorMode(!cli.no_color);

    match cli.command {
        Command::Search { query, json } => search(query, json, color).await,
        Command::Fetch {
            id,
            json,
            process,
            output_dir,
        } => fetch(id, json, process, output_dir, color).await,
        Command::Collect {
            query,
            output_dir,
            workers,
            json,
        } => collect(query, output_dir, workers, json, color).await,
        Command::Segment {
            file,
            abstract_text,
            json,
        } => segment(file, abstract_text, json, color),
        Command::Config { action } => config(action),
    }
}

async fn search(args: QueryArgs, json: bool, color: ColorMode) -> anyhow::Result<()> {
    let config = settings::resolve(Overrides::default());
    let client = RateLimitedClient::arxiv(&config);
    let papers = client.search(&args.to_query()).await?;

    let mut out = std::io::stdout();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&papers)?)?;
        return Ok(());
    }
    if papers.is_empty() {
        writeln!(out, "No papers found.")?;
    }
    for (i, paper) in papers.iter().enumerate() {
        output::print_paper(&mut out, i, paper, color)?;
    }
    Ok(())
}

fn connector(config: &Config) -> anyhow::Result<ArxivConnector> {
    Ok(ArxivConnector::from_config(
        config,
        Arc::new(MupdfBackend::default()),
    )?)
}

async fn fetch(
    id: String,
    json: bool,
    process: bool,
    output_dir: Option<PathBuf>,
    color: ColorMode,
) -> anyhow::Result<()> {
    let config = settings::resolve(Overrides {
        output_dir,
        workers: None,
    });
    let mut out = std::io::stdout();

    if !process {
        let paper = RateLimitedClient::arxiv(&config).fetch_by_id(&id).await?;
        if json {
            writeln!(out, "{}", serde_json::to_string_pretty(&paper)?)?;
        } else {
            output::print_paper(&mut out, 0, &paper, color)?;
        }
        return Ok(());
    }

    let pipeline = Pipeline::from_config(Arc::new(connector(&config)?), &config);
    let outcome = pipeline.process_id(&id).await?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&outcome)?)?;
    } else {
        output::print_outcome(&mut out, &outcome, color)?;
    }
    Ok(())
}

fn progress_bar() -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/dim}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

async fn collect(
    args: QueryArgs,
    output_dir: Option<PathBuf>,
    workers: Option<usize>,
    json: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let config = settings::resolve(Overrides {
        output_dir,
        workers,
    });
    let pipeline = Pipeline::from_config(Arc::new(connector(&config)?), &config);

    let bar = progress_bar();
    let progress = {
        let bar = bar.clone();
        move |event: ProgressEvent| match event {
            ProgressEvent::Searching { query } => {
                bar.set_message(format!("searching \"{query}\""));
            }
            ProgressEvent::Found { total } => {
                bar.set_length(total as u64);
                bar.set_message(format!("{total} papers"));
            }
            ProgressEvent::PaperStarted { paper_id, .. } => {
                bar.set_message(paper_id);
            }
            ProgressEvent::StageFinished {
                paper_id,
                stage,
                ok: false,
                ..
            } => {
                bar.println(format!("{paper_id}: {stage} failed"));
            }
            ProgressEvent::PaperFinished { .. } => bar.inc(1),
            ProgressEvent::Complete { .. } => bar.finish_and_clear(),
            _ => {}
        }
    };

    let cancel = CancellationToken::new();

    // Ctrl+C stops dispatch; papers in flight still finish.
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let result = pipeline.collect(&args.to_query(), progress, cancel).await;
    bar.finish_and_clear();
    let outcomes = result?;

    let mut out = std::io::stdout();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&outcomes)?)?;
        return Ok(());
    }
    for outcome in &outcomes {
        output::print_outcome(&mut out, outcome, color)?;
    }
    output::print_summary(&mut out, &outcomes, color)?;
    Ok(())
}

fn segment(
    file: PathBuf,
    abstract_text: Option<String>,
    json: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let raw = std::fs::read_to_string(&file)?;
    let text = normalize_extracted_text(&raw);

    let config = settings::resolve(Overrides::default());
    let segmenter = SectionSegmenter::with_config(
        SegmenterConfigBuilder::new()
            .min_segments(config.min_segments)
            .min_paragraph_chars(config.min_paragraph_chars)
            .build()?,
    );

    let document_id = uuid::Uuid::new_v5(
        &uuid::Uuid::NAMESPACE_URL,
        file.display().to_string().as_bytes(),
    );
    let mut metadata = Metadata::new();
    metadata.insert("file".into(), file.display().to_string().into());
    let segments =
        segmenter.segment_document(document_id, abstract_text.as_deref(), &metadata, &text);
    let references = segmenter.extract_references(&text);

    let mut out = std::io::stdout();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&segments)?)?;
    } else {
        output::print_segments(&mut out, &segments, references.len(), color)?;
    }
    Ok(())
}

fn config(action: ConfigAction) -> anyhow::Result<()> {
    let file = settings::layered_file();
    match action {
        ConfigAction::Show => {
            if let Some(path) = paperflow_core::config_file::config_path() {
                eprintln!("# platform config: {}", path.display());
            }
            print!("{}", toml::to_string_pretty(&file)?);
        }
        ConfigAction::Save => {
            let path =
                paperflow_core::config_file::save_config(&file).map_err(anyhow::Error::msg)?;
            println!("Configuration saved to: {}", path.display());
        }
    }
    Ok(())
}
