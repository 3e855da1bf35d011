//! Wikipulse: Wikipedia edit statistics and page-view pipeline
//!
//! This crate correlates how much an article is edited with how much it is read:
//!
//! 1. **Parse Pass** -- Stream a compressed revision-history export and build one
//!    record per main-namespace article: edit count, distinct editors, inception
//!    date. Edits by accounts in the bot registry are excluded
//! 2. **Fetch Pass** -- Resolve summed monthly page views for every extracted title
//!    against the Wikimedia metrics API with bounded concurrency
//! 3. **Join** -- Merge both by title into rows where a missing view count stays
//!    distinguishable from a genuine zero
//!
//! # Architecture
//!
//! - **Streaming XML parsing** -- Never materializes the dump; the parser keeps only
//!   the current element and the caller releases it after each event
//! - **Per-page state machine** -- A fresh page context per `<page>`, owned by the
//!   accumulator and dropped when the page closes
//! - **Bounded fetch window** -- At most `concurrency` requests in flight, refilled
//!   as each completes, with an optional overall deadline
//! - **Concurrent result map** -- Workers insert directly into a DashMap keyed by title
//! - **Isolated failures** -- A failed title is recorded, never fatal; only malformed
//!   or truncated dumps abort a run
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming export reader with gzip/bzip2 decompression
//! - [`accumulator`] -- Per-page aggregation state machine
//! - [`extract`] -- Parse pass driver producing the [`models::ArticleStatsTable`]
//! - [`views`] -- Metrics client and bounded-concurrency fetch scheduler
//! - [`join`] -- Result joiner, tabular sinks and the staged CSV files
//! - [`bots`] -- Bot account registry
//! - [`pipeline`] -- End-to-end run over a [`config::PipelineConfig`]
//! - [`models`] -- Core data types
//! - [`stats`] -- Thread-safe atomic counters
//! - [`error`] -- Fatal dump errors and per-title fetch failures
//! - [`config`] -- Defaults and the pipeline configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Whole pipeline in one go
//! wikipulse run -i cawiki-20200701-stub-meta-history.xml.gz -b bots.txt -o joined.csv \
//!     --project ca.wikipedia.org
//!
//! # Or staged, one CSV per step
//! wikipulse extract -i cawiki-20200701-stub-meta-history.xml.gz -b bots.txt -o articles.csv
//! wikipulse views -t articles.csv -o views.csv --project ca.wikipedia.org
//! wikipulse join --articles articles.csv --views views.csv -o joined.csv
//! ```

pub mod accumulator;
pub mod bots;
pub mod config;
pub mod error;
pub mod extract;
pub mod join;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod stats;
pub mod views;
