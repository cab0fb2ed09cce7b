use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use repolens_core::AppBuilder;
use repolens_core::bootstrap::resolve_config_path;
use repolens_index::pipeline::{
    CollectedItem, IncrementalOutcome, IncrementalRun, export, parse_collected_lines,
};
use repolens_index::retriever::format_as_context;
use repolens_index::{RetrievalMode, chunk_file};
use repolens_memory::clock::Clock;
use repolens_memory::loader::read_snapshot_file;
use repolens_memory::{CorpusSnapshot, RecordFilter, RecordKind, RetentionStrategy};

#[derive(Parser, Debug)]
#[command(
    name = "repolens",
    version,
    about = "Build, prune, and query repository knowledge snapshots"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, env = "REPOLENS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a source file into chunks and print them as JSON lines.
    Chunk {
        file: PathBuf,
        /// Print one summary line per chunk instead of JSON.
        #[arg(long)]
        summary: bool,
    },
    /// Merge collected items and source files into a new snapshot.
    Merge(MergeArgs),
    /// Apply a retention policy to a snapshot.
    Prune(PruneArgs),
    /// Append interactions to a history snapshot under the configured retention.
    Record(RecordArgs),
    /// Retrieve the records closest to a query.
    Query(QueryArgs),
    /// Print the statistics block of a snapshot.
    Stats { snapshot: PathBuf },
}

#[derive(clap::Args, Debug)]
struct MergeArgs {
    /// JSON-lines file of collected items, `-` for stdin.
    #[arg(long)]
    items: Option<PathBuf>,
    /// Source files to chunk and embed.
    #[arg(long = "source-file")]
    source_files: Vec<PathBuf>,
    /// Snapshot to merge into.
    #[arg(long)]
    previous: Option<PathBuf>,
    #[arg(long)]
    output: PathBuf,
    /// Apply the configured retention policy after merging.
    #[arg(long)]
    retain: bool,
    /// Upstream source name for watermark tracking.
    #[arg(long, requires = "marker")]
    source: Option<String>,
    /// Marker of the newest upstream item included in this run.
    #[arg(long, requires = "source")]
    marker: Option<String>,
}

#[derive(clap::Args, Debug)]
struct PruneArgs {
    snapshot: PathBuf,
    /// Defaults to rewriting the input snapshot.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    #[arg(long)]
    max_count: Option<usize>,
    #[arg(long)]
    max_age_days: Option<u32>,
}

#[derive(clap::Args, Debug)]
struct RecordArgs {
    /// History snapshot to append to; created if missing.
    history: PathBuf,
    /// JSON-lines file of interactions, `-` for stdin.
    #[arg(long, default_value = "-")]
    items: PathBuf,
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// Query text, embedded with the configured provider.
    #[arg(required_unless_present = "vector")]
    text: Option<String>,
    /// Raw query vector as a JSON array, bypassing the embedder.
    #[arg(long, conflicts_with = "text")]
    vector: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Category hint used to pick the mode when `--mode` is absent.
    #[arg(long)]
    category: Option<String>,
    #[arg(short)]
    k: Option<usize>,
    /// Restrict results to these record kinds.
    #[arg(long = "kind")]
    kinds: Vec<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Count,
    Time,
    Importance,
    Hybrid,
}

impl From<StrategyArg> for RetentionStrategy {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::Count => Self::Count,
            StrategyArg::Time => Self::Time,
            StrategyArg::Importance => Self::Importance,
            StrategyArg::Hybrid => Self::Hybrid,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Code,
    History,
    Mixed,
    All,
}

impl From<ModeArg> for RetrievalMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Code => Self::Code,
            ModeArg::History => Self::History,
            ModeArg::Mixed => Self::Mixed,
            ModeArg::All => Self::All,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Context,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let app = AppBuilder::from_path(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command {
        Command::Chunk { file, summary } => run_chunk(&app, &file, summary).await,
        Command::Merge(args) => run_merge(&app, args).await,
        Command::Prune(args) => run_prune(&app, args).await,
        Command::Record(args) => run_record(&app, args).await,
        Command::Query(args) => run_query(&app, args).await,
        Command::Stats { snapshot } => run_stats(&snapshot).await,
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn run_chunk(app: &AppBuilder, file: &Path, summary: bool) -> anyhow::Result<()> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let chunks = chunk_file(&source, file, &app.config().chunking);
    for chunk in &chunks {
        if summary {
            println!(
                "{}/{} lines {}-{} {} {} ({} chars)",
                chunk.chunk_index + 1,
                chunk.chunk_count,
                chunk.start_line,
                chunk.end_line,
                chunk.unit_type,
                chunk.unit_name.as_deref().unwrap_or("-"),
                chunk.content.chars().count(),
            );
        } else {
            println!("{}", serde_json::to_string(chunk)?);
        }
    }
    tracing::info!(file = %file.display(), chunks = chunks.len(), "chunked");
    Ok(())
}

async fn read_items(path: &Path) -> anyhow::Result<Vec<CollectedItem>> {
    let input = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read items from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    Ok(parse_collected_lines(&input)?)
}

async fn read_previous(path: Option<&Path>) -> anyhow::Result<Option<CorpusSnapshot>> {
    match path {
        Some(p) if p.exists() => Ok(Some(
            read_snapshot_file(p)
                .await
                .with_context(|| format!("failed to read snapshot {}", p.display()))?,
        )),
        Some(p) => {
            tracing::warn!(path = %p.display(), "previous snapshot not found, starting empty");
            Ok(None)
        }
        None => Ok(None),
    }
}

async fn run_merge(app: &AppBuilder, args: MergeArgs) -> anyhow::Result<()> {
    let pipeline = app.build_pipeline()?;
    let previous = read_previous(args.previous.as_deref()).await?;

    let mut items = match &args.items {
        Some(path) => read_items(path).await?,
        None => Vec::new(),
    };
    let mut failed = 0;
    for path in &args.source_files {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let rel = path.to_string_lossy();
        let (records, report) = pipeline
            .collect_source_file(&rel, &source, previous.as_ref())
            .await;
        failed += report.failed.len();
        items.extend(records.into_iter().map(CollectedItem::from));
    }
    let policy = args.retain.then_some(&app.config().retention);

    if let (Some(source), Some(marker)) = (&args.source, &args.marker) {
        let Some(mut watermarks) = app.open_watermarks()? else {
            bail!("--source/--marker need pipeline.watermark_path in the config");
        };
        let outcome = pipeline
            .run_incremental(
                IncrementalRun {
                    source,
                    marker,
                    items,
                    previous: previous.as_ref(),
                    policy,
                    output: &args.output,
                },
                &mut watermarks,
            )
            .await?;
        match outcome {
            IncrementalOutcome::Unchanged => println!("unchanged: {source} already at {marker}"),
            IncrementalOutcome::Exported {
                collect,
                merge,
                bytes,
            } => println!(
                "exported {} records ({bytes} bytes), {} skipped",
                merge.total,
                collect.failed.len() + failed
            ),
        }
        return Ok(());
    }

    let (records, collect) = pipeline.collect(items).await;
    let (snapshot, merge) = pipeline.run_with_report(records, previous.as_ref(), policy);
    let bytes = export(&snapshot, &args.output)?;
    println!(
        "exported {} records ({bytes} bytes), {} skipped",
        merge.total,
        collect.failed.len() + failed
    );
    Ok(())
}

async fn run_prune(app: &AppBuilder, args: PruneArgs) -> anyhow::Result<()> {
    let snapshot = read_snapshot_file(&args.snapshot)
        .await
        .with_context(|| format!("failed to read snapshot {}", args.snapshot.display()))?;

    let mut policy = app.config().retention.clone();
    if let Some(strategy) = args.strategy {
        policy.strategy = strategy.into();
    }
    if let Some(n) = args.max_count {
        policy.max_count = n;
    }
    if let Some(days) = args.max_age_days {
        policy.max_age_days = days;
    }

    let (records, report) = app.build_retention().prune(snapshot.records, &policy);
    let pruned = CorpusSnapshot::build(records, app.clock().now());
    let output = args.output.as_deref().unwrap_or(&args.snapshot);
    export(&pruned, output)?;
    println!(
        "kept {} of {} records ({} removed)",
        report.after,
        report.before,
        report.removed()
    );
    Ok(())
}

async fn run_record(app: &AppBuilder, args: RecordArgs) -> anyhow::Result<()> {
    let pipeline = app.build_pipeline()?;
    let policy = &app.config().retention;
    let mut history = read_previous(Some(&args.history)).await?;

    let mut removed = 0;
    for item in read_items(&args.items).await? {
        let (snapshot, report) = pipeline
            .append_interaction(item, history.as_ref(), policy)
            .await?;
        removed += report.removed();
        history = Some(snapshot);
    }
    let Some(history) = history else {
        bail!("no interactions to record");
    };
    let bytes = export(&history, &args.history)?;
    println!(
        "history holds {} records ({bytes} bytes), {removed} pruned",
        history.len()
    );
    Ok(())
}

async fn run_query(app: &AppBuilder, args: QueryArgs) -> anyhow::Result<()> {
    let engine = app.build_engine()?;
    let k = args.k.unwrap_or(engine.config().default_k);

    let kinds = args
        .kinds
        .iter()
        .map(|k| k.parse::<RecordKind>())
        .collect::<Result<Vec<_>, _>>()?;
    let filter = RecordFilter::default().with_kinds(kinds);
    let mode = args.mode.map(RetrievalMode::from);

    let results = if let Some(raw) = &args.vector {
        let vector: Vec<f32> =
            serde_json::from_str(raw).context("--vector must be a JSON array of numbers")?;
        engine
            .retrieve_vector(&vector, k, mode.unwrap_or(RetrievalMode::Mixed), &filter)
            .await?
    } else {
        let text = args.text.as_deref().unwrap_or_default();
        match (&args.category, mode) {
            (Some(category), _) => {
                engine
                    .retrieve_for_category(text, k, category, mode, &filter)
                    .await?
            }
            (None, mode) => {
                engine
                    .retrieve(text, k, mode.unwrap_or(RetrievalMode::Mixed), &filter)
                    .await?
            }
        }
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Context => println!("{}", format_as_context(&results)),
    }
    Ok(())
}

async fn run_stats(path: &Path) -> anyhow::Result<()> {
    let snapshot = read_snapshot_file(path)
        .await
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let summary = serde_json::json!({
        "schemaVersion": snapshot.schema_version,
        "createdAt": snapshot.created_at,
        "stats": snapshot.stats,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_query_with_vector() {
        let cli = Cli::try_parse_from([
            "repolens", "query", "--vector", "[1.0, 0.0]", "--mode", "code", "-k", "3",
        ])
        .unwrap();
        let Command::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(args.vector.as_deref(), Some("[1.0, 0.0]"));
        assert_eq!(args.k, Some(3));
        assert!(matches!(args.mode, Some(ModeArg::Code)));
    }

    #[test]
    fn cli_requires_text_or_vector() {
        assert!(Cli::try_parse_from(["repolens", "query"]).is_err());
    }

    #[test]
    fn cli_marker_requires_source() {
        assert!(
            Cli::try_parse_from(["repolens", "merge", "--output", "o.gz", "--marker", "abc"])
                .is_err()
        );
    }

    #[test]
    fn cli_parses_prune_overrides() {
        let cli = Cli::try_parse_from([
            "repolens",
            "--config",
            "custom.toml",
            "prune",
            "history.json.gz",
            "--strategy",
            "time",
            "--max-age-days",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("custom.toml")));
        let Command::Prune(args) = cli.command else {
            panic!("expected prune");
        };
        assert!(matches!(args.strategy, Some(StrategyArg::Time)));
        assert_eq!(args.max_age_days, Some(30));
    }

    #[test]
    fn cli_record_reads_stdin_by_default() {
        let cli = Cli::try_parse_from(["repolens", "record", "history.json.gz"]).unwrap();
        let Command::Record(args) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(args.history, PathBuf::from("history.json.gz"));
        assert_eq!(args.items, PathBuf::from("-"));
    }
}
