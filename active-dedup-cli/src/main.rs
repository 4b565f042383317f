mod logging;
mod util;

use active_dedup::deduplicator::{DEFAULT_CLUSTER_THRESHOLD, DEFAULT_N_SAMPLES, DEFAULT_SCORE_THRESHOLD};
use active_dedup::oracle::ConsoleOracle;
use active_dedup::response::{make_report, RunSummary};
use active_dedup::{DedupConfig, DedupError, Deduplicator};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Interactive deduplication of a delimited table.
#[derive(Parser, Debug)]
#[command(name = "active-dedup", version)]
struct Args {
    /// Input table with a header row
    input: PathBuf,
    /// Where to write the table with its `deduplication_id` column
    #[arg(short, long)]
    output: PathBuf,
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Column to compare, repeat for several
    #[arg(long = "col")]
    col_names: Vec<String>,
    /// Approximate number of training pairs
    #[arg(long, default_value_t = DEFAULT_N_SAMPLES)]
    n_samples: usize,
    #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD)]
    score_threshold: f64,
    #[arg(long, default_value_t = DEFAULT_CLUSTER_THRESHOLD)]
    cluster_threshold: f64,
    /// Blocking recall to reach on the training matches
    #[arg(long)]
    recall: Option<f64>,
    /// Add pairwise products of the similarity features
    #[arg(long)]
    interaction: bool,
    #[arg(long)]
    save_intermediate_steps: bool,
    #[arg(long)]
    intermediate_dir: Option<String>,
    /// Seconds to wait for an answer before skipping the pair
    #[arg(long)]
    query_timeout_secs: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = ',')]
    delimiter: char,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_config(args: &Args) -> Result<DedupConfig, DedupError> {
    let mut config = match &args.config {
        Some(path) => util::read_config(path)?,
        None => DedupConfig::default(),
    };
    if !args.col_names.is_empty() {
        config.col_names = Some(args.col_names.clone());
    }
    if let Some(recall) = args.recall {
        config.recall = recall;
    }
    config.interaction |= args.interaction;
    config.save_intermediate_steps |= args.save_intermediate_steps;
    if let Some(dir) = &args.intermediate_dir {
        config.intermediate_dir = dir.clone();
    }
    if args.query_timeout_secs.is_some() {
        config.query_timeout_secs = args.query_timeout_secs;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.verbose = config.verbose.max(args.verbose);
    Ok(config)
}

fn delimiter_byte(delimiter: char) -> Result<u8, DedupError> {
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| DedupError::invalid_config(format!("delimiter '{delimiter}' is not ascii")))
}

fn run(args: &Args, config: &DedupConfig) -> Result<RunSummary, DedupError> {
    let delimiter = delimiter_byte(args.delimiter)?;
    let mut dedup = Deduplicator::new(config)?;
    debug!("{dedup}");

    let start = Instant::now();
    let table = util::pull_data_file(&args.input, delimiter)?;
    info!(
        "{} rows read in {:.4} secs",
        table.len(),
        start.elapsed().as_secs_f64()
    );

    let mut oracle = ConsoleOracle::stdin(config.query_timeout_secs.map(Duration::from_secs));
    dedup.fit(&table, args.n_samples, &mut oracle)?;
    let (result, summary) =
        dedup.predict_with_summary(&table, args.score_threshold, args.cluster_threshold)?;

    let start = Instant::now();
    util::push_result_file(&args.output, &result, delimiter)?;
    info!(
        "result written to {} in {:.4} secs",
        args.output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(summary)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = load_config(&args);
    logging::init_tracing(config.as_ref().map_or(args.verbose, |c| c.verbose));

    let result = config.and_then(|config| run(&args, &config));
    let code = result.as_ref().map_or_else(|err| err.status.code(), |_| 0);
    match make_report(result) {
        Ok(report) => println!("{report:#}"),
        Err(err) => eprintln!("{err}"),
    }
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"col_names": ["name"], "recall": 0.8, "verbose": 1}"#).unwrap();
        let args = parse(&[
            "active-dedup",
            "in.csv",
            "-o",
            "out.csv",
            "-c",
            path.to_str().unwrap(),
            "--col",
            "name",
            "--col",
            "city",
            "--seed",
            "3",
            "-vv",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.col_names, Some(vec!["name".to_string(), "city".to_string()]));
        assert_eq!(config.recall, 0.8);
        assert_eq!(config.seed, Some(3));
        assert_eq!(config.verbose, 2);
    }

    #[test]
    fn defaults_without_config_file() {
        let args = parse(&["active-dedup", "in.csv", "--output", "out.csv", "--col", "name"]);
        assert_eq!(args.n_samples, DEFAULT_N_SAMPLES);
        assert_eq!(args.score_threshold, DEFAULT_SCORE_THRESHOLD);
        let config = load_config(&args).unwrap();
        assert_eq!(config.recall, 1.0);
        assert!(config.query_timeout_secs.is_none());
    }

    #[test]
    fn delimiter_must_be_ascii() {
        assert_eq!(delimiter_byte(';').unwrap(), b';');
        assert!(delimiter_byte('§').is_err());
    }

    #[test]
    fn missing_input_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.csv");
        let output = dir.path().join("out.csv");
        let args = parse(&[
            "active-dedup",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--col",
            "name",
        ]);
        let config = load_config(&args).unwrap();
        let err = run(&args, &config).unwrap_err();
        assert_eq!(err.status, active_dedup::response::Status::Io);
    }
}
