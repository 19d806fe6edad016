// src/main.rs - Links unloaded acquisition deals to their proforma workbooks
use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::info;
use proforma_lib::linkage::review::{ReviewMode, ReviewQueue, Reviewer};
use proforma_lib::linkage::{LinkageEngine, MatchLedger, PgDealSource, UnmatchedLog};
use proforma_lib::utils::config::LinkageConfig;
use proforma_lib::utils::db_connect::connect;
use proforma_lib::utils::env::load_env;
use proforma_lib::utils::progress_bars::progress_config::ProgressConfig;
use proforma_lib::workbook::XlsxStore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct LinkageArgs {
    /// Directory for stamped proforma copies (overrides PROFORMA_OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory for the ledger, unmatched log and review queue (overrides LINKAGE_REPORT_DIR)
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// How ambiguous matches are escalated: prompt, defer or reject (overrides REVIEW_MODE)
    #[arg(long)]
    review_mode: Option<String>,

    /// Only process these deal ids (repeatable)
    #[arg(long = "deal-id")]
    deal_ids: Vec<String>,

    /// Score and review without writing proformas or saving the ledger
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    env_logger::init();
    let args = LinkageArgs::parse();
    info!("Starting proforma linkage run");

    let mut config = LinkageConfig::from_env().context("Invalid linkage configuration")?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = args.report_dir {
        config.report_dir = dir;
    }
    if let Some(mode) = args.review_mode.as_deref() {
        config.review_mode = mode.parse::<ReviewMode>()?;
    }
    config.dry_run = args.dry_run;
    config.log_config();

    let today = Local::now().date_naive();
    let ledger = MatchLedger::open(config.ledger_path(today))
        .context("Failed to load today's match ledger")?;
    let unmatched = UnmatchedLog::at(config.unmatched_log_path());
    let queue = if config.review_mode == ReviewMode::Defer {
        let queue = ReviewQueue::open(config.review_queue_path(today), &config.review_queue_pattern())
            .context("Failed to load reviewed queues")?;
        Some(queue)
    } else {
        None
    };
    let reviewer = Reviewer::for_mode(config.review_mode, queue);
    let matcher = config.build_matcher()?;

    // Console prompts and a redrawing bar would fight over the terminal.
    let progress_config = ProgressConfig::from_env();
    let multi_progress = if config.review_mode == ReviewMode::Prompt {
        None
    } else {
        progress_config.create_multi_progress()
    };
    let deal_pb = progress_config.deal_bar(multi_progress.as_ref(), 0);

    let pool = connect().await.context("Failed to connect to database")?;
    info!("Successfully connected to the database");
    let source = PgDealSource::new(&pool, &config.deal_table, &config.proforma_table);

    let mut engine = LinkageEngine::new(config, matcher, XlsxStore::new(), reviewer, ledger, unmatched)
        .with_progress(deal_pb);
    let summary = engine
        .run_with_source(&source, &args.deal_ids)
        .await
        .context("Linkage run failed")?;

    if let Some(queue) = engine.reviewer().queue() {
        if let Some(path) = queue.export()? {
            info!("Deferred reviews written to {}", path.display());
        }
    }
    if let Some(path) = engine.ledger().export_path() {
        info!("Match ledger: {} ({} entries)", path.display(), engine.ledger().len());
    }
    if let Some(path) = engine.unmatched_log().path() {
        if summary.unmatched > 0 {
            info!("Unmatched deals logged to {}", path.display());
        }
    }
    info!(
        "Run finished: {} matched, {} unmatched of {} deals",
        summary.matched, summary.unmatched, summary.deals_total
    );
    Ok(())
}
