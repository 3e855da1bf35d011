use crate::accumulator::{ArticleAccumulator, Step};
use crate::bots::BotRegistry;
use crate::config::PROGRESS_INTERVAL;
use crate::error::DumpError;
use crate::models::ArticleStatsTable;
use crate::parser::{open_dump, DumpEventParser, Element, EventKind};
use crate::stats::PipelineStats;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::io::BufRead;
use tracing::{info, warn};

/// Streams a decompressed export through the page accumulator.
///
/// Any parse error or schema violation aborts the pass; a table built from a
/// corrupted dump is never returned. `limit` stops after that many pages have
/// closed (articles and discarded pages alike).
pub fn extract_articles<R: BufRead>(
    input: R,
    bots: &BotRegistry,
    stats: &PipelineStats,
    limit: Option<u64>,
) -> Result<ArticleStatsTable, DumpError> {
    let mut parser = DumpEventParser::new(input);
    let mut accumulator = ArticleAccumulator::new();
    let mut table = ArticleStatsTable::new();
    let mut closed = 0u64;
    let pb = ProgressBar::new_spinner();

    loop {
        let offset = parser.buffer_position();
        let Some(event) = parser.next_event()? else {
            break;
        };

        if event.kind == EventKind::Start && event.element == Element::Page {
            stats.inc_pages();
            if stats.pages() % PROGRESS_INTERVAL == 0 {
                pb.set_message(format!("{} pages", stats.pages()));
                pb.tick();
            }
        }

        let step = accumulator.handle(&event, bots, offset)?;
        parser.release();

        match step {
            Step::Continue => continue,
            Step::BotEditSkipped => {
                stats.inc_bot_edits();
                continue;
            }
            Step::Emitted(record) => {
                stats.inc_articles();
                if let Some(previous) = table.insert(record) {
                    warn!(title = %previous.title, "Duplicate page title, keeping the later record");
                }
            }
            Step::Discarded => stats.inc_discarded(),
        }

        closed += 1;
        if limit.is_some_and(|max| closed >= max) {
            info!(pages = closed, "Page limit reached");
            break;
        }
    }

    pb.finish_and_clear();

    info!(
        pages = stats.pages(),
        articles = table.len(),
        discarded = stats.discarded(),
        bot_edits = stats.bot_edits(),
        "Parse pass complete"
    );

    Ok(table)
}

pub fn run_extraction(
    path: &str,
    bots: &BotRegistry,
    stats: &PipelineStats,
    limit: Option<u64>,
) -> Result<ArticleStatsTable> {
    info!("Extracting article statistics from: {}", path);
    let input = open_dump(path)?;
    extract_articles(input, bots, stats, limit)
        .with_context(|| format!("Failed to extract articles from dump: {}", path))
}
