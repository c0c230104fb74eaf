//! pipeline-runner: headless batch runner for the retention pipeline.
//!
//! Usage:
//!   pipeline-runner --db retention.db
//!   pipeline-runner --db retention.db --ingest events.jsonl --report report.txt
//!   pipeline-runner --db retention.db --config pipeline.json --seed 7

use anyhow::{Context, Result};
use chrono::Utc;
use retention_core::{
    config::PipelineConfig,
    event::TransactionEvent,
    pipeline::{Pipeline, RunSummary},
    store::PipelineStore,
};
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::str::FromStr;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let db = str_arg(&args, "--db").unwrap_or(":memory:");
    let ingest = str_arg(&args, "--ingest");
    let report_path = str_arg(&args, "--report");
    let config_path = str_arg(&args, "--config");

    let mut config = match config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => PipelineConfig::default(),
    };

    // CLI overrides win over the config file.
    if let Some(v) = parse_arg::<i64>(&args, "--lookback-days")? {
        config.lookback_days = v;
    }
    if let Some(v) = parse_arg::<i64>(&args, "--label-window-days")? {
        config.label_window_days = v;
    }
    if let Some(v) = parse_arg::<f64>(&args, "--top-pct")? {
        config.top_pct = v;
    }
    if let Some(v) = parse_arg::<u64>(&args, "--seed")? {
        config.seed = v;
    }
    if let Some(c) = str_arg(&args, "--cutoff") {
        config.cutoff_date = Some(c.to_string());
    }

    println!("retention pipeline-runner");
    println!("  db:       {db}");
    println!("  lookback: {}d", config.lookback_days);
    println!("  window:   {}d", config.label_window_days);
    println!("  seed:     {}", config.seed);
    println!();

    let store = PipelineStore::open(db)?;
    store.migrate()?;

    if let Some(path) = ingest {
        let count = ingest_jsonl(&store, path)?;
        println!("  ingested {count} events from {path}");
    }

    let pipeline = Pipeline::new(config, store);
    let started_at = Utc::now().to_rfc3339();
    let summary = pipeline.run(&started_at)?;

    print_summary(&summary);

    let latest = pipeline.store().latest_actions(&pipeline.run_id)?;
    println!();
    println!("  latest-snapshot actions: {}", latest.len());
    let p1 = latest
        .iter()
        .filter(|a| matches!(a.priority, retention_core::campaign::Priority::P1))
        .count();
    println!("  of which P1:             {p1}");

    if let Some(path) = report_path {
        let mut f = File::create(path)?;
        f.write_all(summary.report.render().as_bytes())?;
        f.write_all(b"\n")?;
        println!("  report written to {path}");
    }

    Ok(())
}

/// Load newline-delimited JSON transaction events into the store.
fn ingest_jsonl(store: &PipelineStore, path: &str) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("cannot open {path}"))?;
    let mut events: Vec<TransactionEvent> = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: TransactionEvent = serde_json::from_str(&line)
            .with_context(|| format!("{path}:{}: bad event row", lineno + 1))?;
        events.push(event);
    }
    Ok(store.insert_transactions(&events)?)
}

fn print_summary(summary: &RunSummary) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:        {}", summary.run_id);
    println!("  transactions:  {}", summary.transactions);
    println!("  customers:     {}", summary.customers);
    println!("  feature rows:  {}", summary.feature_rows);
    println!("  labeled rows:  {}", summary.labeled_rows);
    println!("  segment rows:  {}", summary.segment_rows);
    println!("  score rows:    {}", summary.score_rows);
    println!("  action rows:   {}", summary.action_rows);
    println!();
    println!("=== MODEL REPORT ===");
    println!("{}", summary.report.render());
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match str_arg(args, flag) {
        Some(raw) => {
            let value = raw
                .parse::<T>()
                .with_context(|| format!("invalid value for {flag}: {raw}"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn print_usage() {
    println!("pipeline-runner [options]");
    println!("  --db PATH                SQLite database (default :memory:)");
    println!("  --ingest PATH            newline-delimited JSON events to load first");
    println!("  --config PATH            JSON pipeline config");
    println!("  --report PATH            write the model report here");
    println!("  --lookback-days N        behavioral lookback window");
    println!("  --label-window-days N    churn outcome window");
    println!("  --cutoff YYYY-MM-DD      explicit train/test cutoff");
    println!("  --top-pct F              action-flag share per snapshot");
    println!("  --seed N                 model seed");
}
