use clap::{Arg, ArgAction, ArgMatches, Command};
use index_advisor::logging::{init_logging, parse_level};
use index_advisor::{
    AdvisorConfig, CancellationToken, Error, InMemorySample, IndexAdvisor, JsonLinesWorkload,
    OutputFormat, Result, WriterSink,
};
use std::io;
use std::sync::Arc;
use tracing::{info, warn};

/// Index advisor CLI
///
/// Reads a profiler export and a document sample, prints ranked index
/// recommendations for one namespace.
#[tokio::main]
async fn main() {
    let matches = create_cli().get_matches();

    if let Err(e) = run(matches).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.error_code().saturating_abs());
    }
}

fn create_cli() -> Command {
    Command::new("index-advisor")
        .about("Recommend compound indexes from a query workload and a document sample")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("workload")
                .help("Profiler export, one JSON document per line")
                .short('w')
                .long("workload")
                .required(true),
        )
        .arg(
            Arg::new("sample")
                .help("Document sample, one JSON document per line")
                .short('s')
                .long("sample")
                .required(true),
        )
        .arg(
            Arg::new("namespace")
                .help("Namespace (db.collection) to analyze; empty analyzes every entry")
                .short('n')
                .long("namespace")
                .default_value(""),
        )
        .arg(
            Arg::new("config")
                .help("JSON configuration file")
                .short('c')
                .long("config"),
        )
        .arg(
            Arg::new("collection-count")
                .help("Size of the sampled collection, for document estimates")
                .long("collection-count")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("concurrency")
                .help("Maximum concurrent sample queries")
                .long("concurrency")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("top")
                .help("Only report the best N recommendations")
                .long("top")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout-secs")
                .help("Abort the run after this many seconds")
                .long("timeout-secs")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("format")
                .help("Output format: text (default) or json")
                .short('o')
                .long("format")
                .value_parser(["text", "json"])
                .default_value("text"),
        )
        .arg(
            Arg::new("log-level")
                .help("Log level: trace, debug, info, warn, error")
                .long("log-level")
                .default_value("warn"),
        )
        .arg(
            Arg::new("json-logs")
                .help("Emit logs as JSON")
                .long("json-logs")
                .action(ArgAction::SetTrue),
        )
}

fn load_config(matches: &ArgMatches) -> Result<AdvisorConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AdvisorConfig::from_file(path)?,
        None => AdvisorConfig::default(),
    };
    config.apply_env_overrides()?;

    if let Some(&concurrency) = matches.get_one::<usize>("concurrency") {
        config.max_concurrency = concurrency;
    }
    if let Some(&top) = matches.get_one::<usize>("top") {
        config.max_recommendations = Some(top);
    }
    if let Some(&secs) = matches.get_one::<u64>("timeout-secs") {
        config.run_timeout_ms = Some(secs.saturating_mul(1000));
    }
    Ok(config)
}

async fn run(matches: ArgMatches) -> Result<()> {
    let level = parse_level(matches.get_one::<String>("log-level").map_or("warn", String::as_str))?;
    init_logging(level, matches.get_flag("json-logs"))?;

    let config = load_config(&matches)?;
    let format: OutputFormat = matches
        .get_one::<String>("format")
        .map(|s| s.parse().unwrap_or_default())
        .unwrap_or_default();
    let namespace = matches.get_one::<String>("namespace").cloned().unwrap_or_default();

    let sample_path = matches
        .get_one::<String>("sample")
        .ok_or_else(|| Error::Config("--sample is required".into()))?;
    let workload_path = matches
        .get_one::<String>("workload")
        .ok_or_else(|| Error::Config("--workload is required".into()))?;

    let mut sample = InMemorySample::from_json_lines(sample_path)?;
    if let Some(&count) = matches.get_one::<u64>("collection-count") {
        sample = sample.with_collection_count(count);
    }
    info!(documents = sample.len(), "Sample loaded");

    let advisor = IndexAdvisor::new(config, Arc::new(sample))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_signal.cancel();
        }
    });

    let stdout = io::stdout();
    let mut sink = WriterSink::new(stdout.lock(), format);
    advisor
        .run(JsonLinesWorkload::new(workload_path), &namespace, &cancel, &mut sink)
        .await?;
    Ok(())
}
