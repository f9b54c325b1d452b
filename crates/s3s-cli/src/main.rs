//! 🚀 s3s-cli: the front door. Parses flags, loads config, sets up logging, and hands
//! the actual work to the `s3s` library.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..." 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use s3s::backends::{FileSink, SinkBackend, StdoutSink};
use s3s::progress::render_dry_run_summary;
use s3s::validation::{TimeOptions, check_dry_run, resolve_window, validate_paths};
use s3s::{
    Client, ConfigOverrides, FormatType, OutputFormat, QueryOptions, QuerySpec, RunOutcome, RunRequest, S3Path,
    load_config,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Query objects in S3 with S3 Select, many at a time.
#[derive(Parser, Debug)]
#[command(name = "s3s", version, about, long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "S3S_CONFIG")]
    config: Option<PathBuf>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Concurrent listings and concurrent queries (each)
    #[arg(long = "thread-count", global = true)]
    thread_count: Option<usize>,

    /// Attempts per AWS API call, first try included
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Show a progress spinner on stderr
    #[arg(long, global = true)]
    progress: bool,

    /// Verbose logging on stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query JSON-lines objects
    Json(QueryArgs),
    /// Query CSV objects
    Csv(CsvArgs),
    /// Query Application Load Balancer access logs
    Alb(LogArgs),
    /// Query CloudFront access logs
    Cf(LogArgs),
    /// List buckets, or the directories under s3://bucket/prefix
    Ls(LsArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Full S3 Select expression, used as-is
    #[arg(short, long)]
    query: Option<String>,

    /// WHERE clause. Log fields can be referenced by name
    #[arg(short, long = "where")]
    where_clause: Option<String>,

    #[arg(short, long)]
    limit: Option<u64>,

    /// Print only the total number of matching records
    #[arg(short, long)]
    count: bool,

    /// Estimate the objects and bytes a run would scan, without querying
    #[arg(long)]
    dry_run: bool,

    /// Write results to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// s3://bucket/prefix ...
    paths: Vec<String>,
}

#[derive(Args, Debug)]
struct CsvArgs {
    #[command(flatten)]
    common: QueryArgs,

    /// Field delimiter (`\t` is understood)
    #[arg(long, default_value = ",")]
    field_delimiter: String,

    /// Record delimiter (`\n` and `\r\n` are understood)
    #[arg(long, default_value = "\\n")]
    record_delimiter: String,

    /// Emit CSV instead of JSON
    #[arg(long)]
    csv_output: bool,
}

#[derive(Args, Debug)]
struct LogArgs {
    #[command(flatten)]
    common: QueryArgs,

    /// Look back this far from now, e.g. `2h30m`
    #[arg(long, value_parser = parse_duration)]
    duration: Option<TimeDelta>,

    /// Window start, `YYYY-MM-DD HH:MM:SS` (UTC)
    #[arg(long, value_parser = parse_timestamp)]
    since: Option<DateTime<Utc>>,

    /// Window end, `YYYY-MM-DD HH:MM:SS` (UTC)
    #[arg(long, value_parser = parse_timestamp)]
    until: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
struct LsArgs {
    /// s3://bucket[/prefix]. Lists buckets when omitted
    path: Option<String>,
}

/// ⏱️ Go-style durations: `90m`, `2h30m`, `1h15m30s`.
fn parse_duration(raw: &str) -> Result<TimeDelta, String> {
    let (negative, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    if body.is_empty() {
        return Err(format!("'{raw}' is not a duration"));
    }

    let mut total = TimeDelta::zero();
    let mut digits = String::new();
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: i64 = digits
            .parse()
            .map_err(|_| format!("'{raw}' is not a duration: missing number before '{c}'"))?;
        digits.clear();
        let part = match c {
            'h' => TimeDelta::try_hours(amount),
            'm' => TimeDelta::try_minutes(amount),
            's' => TimeDelta::try_seconds(amount),
            other => return Err(format!("'{raw}' is not a duration: unknown unit '{other}'")),
        }
        .ok_or_else(|| format!("'{raw}' is out of range"))?;
        total = total
            .checked_add(&part)
            .ok_or_else(|| format!("'{raw}' is out of range"))?;
    }
    if !digits.is_empty() {
        return Err(format!("'{raw}' is not a duration: '{digits}' has no unit"));
    }
    Ok(if negative { -total } else { total })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("'{raw}' is not a '{TIMESTAMP_FORMAT}' timestamp: {e}"))
}

fn unescape(raw: &str) -> String {
    raw.replace("\\t", "\t").replace("\\r", "\r").replace("\\n", "\n")
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "s3s=debug,s3s_cli=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// 🧾 Flags → a validated run request plus where its output should go.
fn build_request(
    format_type: FormatType,
    args: &QueryArgs,
    time: &TimeOptions,
    csv: Option<&CsvArgs>,
) -> Result<RunRequest> {
    let paths = validate_paths(&args.paths)?;
    let window = resolve_window(format_type, time, Utc::now())?;
    if args.dry_run {
        check_dry_run(format_type, &window)?;
    }

    let expression = QueryOptions {
        query: args.query.clone(),
        where_clause: args.where_clause.clone(),
        limit: args.limit,
        count: args.count,
    }
    .resolve_expression(format_type)?;

    let mut query = QuerySpec::new(format_type, expression).with_count_mode(args.count);
    if let Some(csv) = csv {
        query = query
            .with_delimiters(unescape(&csv.field_delimiter), unescape(&csv.record_delimiter))
            .with_output_format(if csv.csv_output { OutputFormat::Csv } else { OutputFormat::Json });
    }

    Ok(RunRequest {
        paths,
        query,
        window,
        dry_run: args.dry_run,
    })
}

async fn open_sink(output: Option<&PathBuf>) -> Result<SinkBackend> {
    Ok(match output {
        Some(path) => SinkBackend::File(FileSink::create(path).await?),
        None => SinkBackend::Stdout(StdoutSink::new()),
    })
}

/// 🚀 Runs or estimates `request`. The output file is only opened for a real run.
async fn query(client: &Client, request: RunRequest, output: Option<&PathBuf>) -> Result<()> {
    if request.dry_run {
        let summary = client
            .estimate(&request.paths, &request.query, &request.window)
            .await?;
        println!("{}", render_dry_run_summary(&summary));
        return Ok(());
    }

    let mut sink = open_sink(output).await?;
    match client.run(&request, &mut sink).await? {
        RunOutcome::Streamed { objects, count } => {
            info!("✅ done: {objects} objects queried, count = {count:?}");
        }
        RunOutcome::DryRun(summary) => println!("{}", render_dry_run_summary(&summary)),
    }
    Ok(())
}

async fn ls(client: &Client, args: &LsArgs) -> Result<()> {
    let entries = match &args.path {
        Some(raw) => {
            let path = S3Path::parse(raw)?;
            client
                .list_dirs(&path)
                .await?
                .into_iter()
                .map(|dir| format!("s3://{}/{dir}", path.bucket))
                .collect()
        }
        None => client.list_buckets().await?,
    };
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = ConfigOverrides {
        concurrency: cli.thread_count,
        show_progress: cli.progress.then_some(true),
        region: cli.region.clone(),
        max_retries: cli.max_retries,
    };
    let app_config = load_config(cli.config.as_deref(), &overrides)
        .context("💀 couldn't load the configuration. Check the file, the S3S_* variables and the flags.")?;
    let client = Client::from_config(&app_config).await?;

    match &cli.command {
        Command::Ls(args) => ls(&client, args).await,
        Command::Json(args) => {
            let request = build_request(FormatType::Json, args, &TimeOptions::default(), None)?;
            query(&client, request, args.output.as_ref()).await
        }
        Command::Csv(csv) => {
            let request = build_request(FormatType::Csv, &csv.common, &TimeOptions::default(), Some(csv))?;
            query(&client, request, csv.common.output.as_ref()).await
        }
        Command::Alb(log) | Command::Cf(log) => {
            let format_type = if matches!(cli.command, Command::Alb(_)) {
                FormatType::AlbLogs
            } else {
                FormatType::CfLogs
            };
            let time = TimeOptions {
                duration: log.duration,
                since: log.since,
                until: log.until,
            };
            let request = build_request(format_type, &log.common, &time, None)?;
            query(&client, request, log.common.output.as_ref()).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        error!("💀 error: {err}");
        // -- 🧅 peel the onion, one layer at a time
        let mut smells_like_credentials_or_network = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {cause}");
            let cause = cause.to_string();
            if [
                "dispatch failure",
                "credentials",
                "ExpiredToken",
                "InvalidAccessKeyId",
                "timed out",
                "onnection refused",
                "dns error",
            ]
            .iter()
            .any(|needle| cause.contains(needle))
            {
                smells_like_credentials_or_network = true;
            }
        }
        if smells_like_credentials_or_network {
            error!(
                "🔧 hint: S3 could not be reached or did not accept the credentials. \
                 Check AWS_PROFILE / AWS_REGION (or --region), `aws sts get-caller-identity`, \
                 and the endpoint_url in the config if you use one."
            );
        }
        std::process::exit(1);
    }
    Ok(())
}
