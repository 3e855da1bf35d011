use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wikipulse::bots::BotRegistry;
use wikipulse::config::{self, PipelineConfig, RetryPolicy};
use wikipulse::join::{self, CsvSink, JoinSummary};
use wikipulse::stats::PipelineStats;
use wikipulse::views;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikipulse")]
#[command(about = "Correlate Wikipedia edit activity with page views")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract per-article edit statistics from a revision-history dump
    Extract(ExtractArgs),
    /// Fetch page views for a list of titles
    Views(ViewsArgs),
    /// Join article statistics with page views
    Join(JoinArgs),
    /// Extract, fetch and join in one run
    Run(RunArgs),
    /// Split a joined CSV into featured and remaining articles
    SplitFeatured(SplitArgs),
}

#[derive(Args)]
struct DumpArgs {
    /// Path to the revision-history dump (.xml.gz, .xml.bz2 or .xml)
    #[arg(short, long)]
    input: String,

    /// Bot account list, one name per line
    #[arg(short, long)]
    bots: Option<String>,

    /// Limit number of pages to process (for testing)
    #[arg(long)]
    limit: Option<u64>,
}

#[derive(Args)]
struct FetchArgs {
    /// Maximum concurrent requests to the metrics API
    #[arg(long, default_value_t = config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// First day of the page-view range (YYYY-MM-DD)
    #[arg(long, default_value = config::DEFAULT_RANGE_START)]
    start: String,

    /// Last day of the page-view range (YYYY-MM-DD)
    #[arg(long, default_value = config::DEFAULT_RANGE_END)]
    end: String,

    /// Give up on titles still pending after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Metrics API host
    #[arg(long, default_value = config::DEFAULT_API_HOST)]
    host: String,

    /// Wiki project, e.g. ca.wikipedia.org
    #[arg(long, default_value = config::DEFAULT_PROJECT)]
    project: String,

    /// Attempts per title when the connection fails
    #[arg(long, default_value_t = config::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Seconds to wait before retrying a failed connection
    #[arg(long, default_value_t = config::DEFAULT_BACKOFF_SECS)]
    backoff_secs: u64,

    /// Double the backoff after every failed attempt
    #[arg(long)]
    exponential_backoff: bool,
}

impl FetchArgs {
    fn to_config(&self, dump_path: &str) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            dump_path: dump_path.to_string(),
            concurrency: self.concurrency,
            date_range_start: config::parse_date(&self.start)
                .with_context(|| format!("Invalid --start date: {}", self.start))?,
            date_range_end: config::parse_date(&self.end)
                .with_context(|| format!("Invalid --end date: {}", self.end))?,
            fetch_deadline: self.deadline_secs.map(Duration::from_secs),
            api_host: self.host.clone(),
            project: self.project.clone(),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff: Duration::from_secs(self.backoff_secs),
                exponential: self.exponential_backoff,
            },
            ..PipelineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct ExtractArgs {
    #[command(flatten)]
    dump: DumpArgs,

    /// Output CSV for article statistics
    #[arg(short, long)]
    output: String,
}

#[derive(Args)]
struct ViewsArgs {
    /// Titles to fetch: a .txt list (one per line) or an article statistics .csv
    #[arg(short, long)]
    titles: String,

    /// Output CSV for page views
    #[arg(short, long)]
    output: String,

    #[command(flatten)]
    fetch: FetchArgs,
}

#[derive(Args)]
struct JoinArgs {
    /// Article statistics CSV produced by `extract`
    #[arg(long)]
    articles: String,

    /// Page-view CSV produced by `views`
    #[arg(long)]
    views: String,

    /// Output CSV for joined rows
    #[arg(short, long)]
    output: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    dump: DumpArgs,

    #[command(flatten)]
    fetch: FetchArgs,

    /// Output CSV for joined rows
    #[arg(short, long)]
    output: String,

    /// Also keep the intermediate article statistics CSV here
    #[arg(long)]
    articles_out: Option<String>,
}

#[derive(Args)]
struct SplitArgs {
    /// Joined CSV produced by `join` or `run`
    #[arg(short, long)]
    input: String,

    /// Featured-article titles, one per line
    #[arg(short, long)]
    featured: String,

    #[arg(long, default_value = "featured.csv")]
    featured_out: String,

    #[arg(long, default_value = "rest.csv")]
    rest_out: String,
}

fn load_bots(path: Option<&str>) -> Result<BotRegistry> {
    match path {
        Some(path) => {
            let bots = BotRegistry::load(path)?;
            debug!(names = ?bots.names(), "Bot registry loaded");
            Ok(bots)
        }
        None => {
            info!("No bot list given, counting every contributor");
            Ok(BotRegistry::empty())
        }
    }
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let bots = load_bots(args.dump.bots.as_deref())?;
    let stats = PipelineStats::new();

    let start = Instant::now();
    let table = wikipulse::extract::run_extraction(&args.dump.input, &bots, &stats, args.dump.limit)?;
    join::write_articles_csv(Path::new(&args.output), &table)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Extraction time:    {:.2}s", duration.as_secs_f64());
    println!("Pages seen:         {}", stats.pages());
    println!("Articles:           {}", table.len());
    println!("Non-article pages:  {}", stats.discarded());
    println!("Bot edits skipped:  {}", stats.bot_edits());
    println!("Bots in registry:   {}", bots.len());

    Ok(())
}

fn read_titles(path: &str) -> Result<Vec<String>> {
    if path.ends_with(".csv") {
        let table = join::read_articles_csv(Path::new(path))?;
        return Ok(table.titles().map(str::to_string).collect());
    }
    let file = File::open(path).with_context(|| format!("Failed to open title list: {}", path))?;
    views::read_title_list(BufReader::new(file))
}

fn run_views(args: ViewsArgs) -> Result<()> {
    let config = args.fetch.to_config("")?;
    let titles = read_titles(&args.titles)?;
    info!(titles = titles.len(), "Loaded titles from {}", args.titles);

    let stats = Arc::new(PipelineStats::new());
    let start = Instant::now();
    let rt = wikipulse::pipeline::build_runtime()?;
    let results = rt.block_on(views::run_fetch(&titles, &config, Arc::clone(&stats)))?;
    join::write_views_csv(Path::new(&args.output), &results)?;
    let duration = start.elapsed();

    let fetched = results.fetched();
    let total_views: u64 = fetched.iter().map(|r| r.total_views).sum();
    let failed = results.failed();
    if !failed.is_empty() {
        warn!(count = failed.len(), "Titles without views: {}", failed.join(", "));
    }

    println!();
    println!("=== Summary ===");
    println!("Fetch time:         {:.2}s", duration.as_secs_f64());
    println!("Titles:             {}", results.len());
    println!("Fetched:            {}", fetched.len());
    println!("Total views:        {}", total_views);
    println!("Failed:             {}", failed.len());
    println!("Deadline failures:  {}", stats.deadline());

    Ok(())
}

fn print_join_summary(summary: &JoinSummary) {
    println!("Rows written:       {}", summary.rows);
    println!("Views known:        {}", summary.known);
    println!("Views unknown:      {}", summary.unknown);
}

fn run_join(args: JoinArgs) -> Result<()> {
    let summary = join::join_csv_files(
        Path::new(&args.articles),
        Path::new(&args.views),
        Path::new(&args.output),
    )?;
    println!();
    println!("=== Summary ===");
    print_join_summary(&summary);
    Ok(())
}

fn run_all(args: RunArgs) -> Result<()> {
    let bots = load_bots(args.dump.bots.as_deref())?;
    let config = args.fetch.to_config(&args.dump.input)?;
    let stats = Arc::new(PipelineStats::new());

    let start = Instant::now();
    let output =
        wikipulse::pipeline::run_pipeline(&config, &bots, Arc::clone(&stats), args.dump.limit)?;

    if let Some(ref path) = args.articles_out {
        join::write_articles_csv(Path::new(path), &output.table)?;
    }
    let mut sink = CsvSink::create(Path::new(&args.output))?;
    let summary = join::emit(&output.rows, &mut sink)?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", duration.as_secs_f64());
    println!("Pages seen:         {}", stats.pages());
    println!("Articles:           {}", output.table.len());
    println!("Bot edits skipped:  {}", stats.bot_edits());
    println!("Views fetched:      {}", stats.fetched());
    println!("Views failed:       {}", stats.failed());
    print_join_summary(&summary);

    Ok(())
}

fn run_split(args: SplitArgs) -> Result<()> {
    let file = File::open(&args.featured)
        .with_context(|| format!("Failed to open featured list: {}", args.featured))?;
    let featured = join::read_featured(BufReader::new(file))?;
    let (n_featured, n_rest) = join::split_featured(
        Path::new(&args.input),
        &featured,
        Path::new(&args.featured_out),
        Path::new(&args.rest_out),
    )?;

    println!();
    println!("=== Summary ===");
    println!("Featured titles:    {}", featured.len());
    println!("Featured rows:      {}", n_featured);
    println!("Remaining rows:     {}", n_rest);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::Views(args) => run_views(args),
        Commands::Join(args) => run_join(args),
        Commands::Run(args) => run_all(args),
        Commands::SplitFeatured(args) => run_split(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
