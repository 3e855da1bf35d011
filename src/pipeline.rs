use crate::bots::BotRegistry;
use crate::config::PipelineConfig;
use crate::extract::run_extraction;
use crate::join::{join_results, JoinedRecord};
use crate::models::ArticleStatsTable;
use crate::stats::PipelineStats;
use crate::views::{run_fetch, ViewResults};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::info;

pub struct PipelineOutput {
    pub table: ArticleStatsTable,
    pub views: ViewResults,
    pub rows: Vec<JoinedRecord>,
}

/// Runtime for the fetch pass. The parse pass stays on the calling thread.
pub fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("wikipulse-fetch-worker")
        .enable_io()
        .enable_time()
        .build()
        .context("Failed to build async runtime")
}

/// Parse pass, fetch pass over the extracted titles, then join.
pub fn run_pipeline(
    config: &PipelineConfig,
    bots: &BotRegistry,
    stats: Arc<PipelineStats>,
    limit: Option<u64>,
) -> Result<PipelineOutput> {
    config.validate()?;

    let start_parse = Instant::now();
    let table = run_extraction(&config.dump_path, bots, &stats, limit)?;
    info!(
        duration_secs = start_parse.elapsed().as_secs_f64(),
        articles = table.len(),
        "Extraction complete"
    );

    let start_fetch = Instant::now();
    let rt = build_runtime()?;
    let views = rt.block_on(run_fetch(table.titles(), config, Arc::clone(&stats)))?;
    info!(
        duration_secs = start_fetch.elapsed().as_secs_f64(),
        fetched = stats.fetched(),
        failed = stats.failed(),
        "Fetch complete"
    );

    let rows = join_results(&table, &views);
    Ok(PipelineOutput { table, views, rows })
}
