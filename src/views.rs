//! Page-view fetch pass.
//!
//! Every title gets exactly one [`ViewOutcome`]. At most `concurrency`
//! requests are in flight; a new one is spawned only when another finishes.
//! Failures never abort the pass: a rejected request, an undecodable body,
//! an exhausted retry budget, or the overall deadline all end up as
//! `ViewOutcome::Failed` for that title only.

use crate::config::{PipelineConfig, RetryPolicy, USER_AGENT};
use crate::error::FetchFailure;
use crate::models::ViewFetchResult;
use crate::stats::PipelineStats;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::future::Future;
use std::io::BufRead;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOutcome {
    Fetched(u64),
    Failed(FetchFailure),
}

impl ViewOutcome {
    pub fn total(&self) -> Option<u64> {
        match self {
            ViewOutcome::Fetched(total) => Some(*total),
            ViewOutcome::Failed(_) => None,
        }
    }
}

/// Anything that can resolve a title to its summed page views.
pub trait ViewSource: Send + Sync + 'static {
    fn fetch(&self, title: &str) -> impl Future<Output = ViewOutcome> + Send;
}

#[derive(Deserialize)]
struct PageviewsResponse {
    items: Vec<PageviewsItem>,
}

#[derive(Deserialize)]
struct PageviewsItem {
    views: u64,
}

/// Sums the `views` field of every monthly item in a metrics response.
pub fn sum_views(body: &[u8]) -> Result<u64, serde_json::Error> {
    let response: PageviewsResponse = serde_json::from_slice(body)?;
    Ok(response.items.iter().map(|item| item.views).sum())
}

/// Per-article monthly endpoint. Spaces become underscores, then the whole
/// title is percent-encoded (including `/`).
pub fn pageviews_url(
    host: &str,
    project: &str,
    title: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> String {
    let article = title.replace(' ', "_");
    format!(
        "{}/api/rest_v1/metrics/pageviews/per-article/{}/all-access/all-agents/{}/monthly/{}/{}",
        host.trim_end_matches('/'),
        project,
        urlencoding::encode(&article),
        start.format("%Y%m%d"),
        end.format("%Y%m%d"),
    )
}

/// One title per line; underscores are normalized to spaces so the titles
/// match dump titles. Blank lines and repeats are dropped.
pub fn read_title_list<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut seen = FxHashSet::default();
    let mut titles = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read title list")?;
        let title = line.trim().replace('_', " ");
        if title.is_empty() {
            continue;
        }
        if seen.insert(title.clone()) {
            titles.push(title);
        }
    }
    Ok(titles)
}

enum Attempt {
    Done(ViewOutcome),
    Transient(String),
}

/// Metrics API client (Wikimedia REST `pageviews/per-article`).
pub struct PageviewsClient {
    client: Client,
    host: String,
    project: String,
    start: NaiveDate,
    end: NaiveDate,
    retry: RetryPolicy,
}

impl PageviewsClient {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build metrics HTTP client")?;

        Ok(Self {
            client,
            host: config.api_host.clone(),
            project: config.project.clone(),
            start: config.date_range_start,
            end: config.date_range_end,
            retry: config.retry,
        })
    }

    pub fn url_for(&self, title: &str) -> String {
        pageviews_url(&self.host, &self.project, title, self.start, self.end)
    }

    async fn attempt(&self, title: &str, url: &str) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Transient(e.to_string()),
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(title, status = status.as_u16(), body = %body, "Page-view request rejected");
            return Attempt::Done(ViewOutcome::Failed(FetchFailure::Status {
                status: status.as_u16(),
                body,
            }));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Attempt::Transient(e.to_string()),
        };

        match sum_views(&body) {
            Ok(total) => Attempt::Done(ViewOutcome::Fetched(total)),
            Err(e) => {
                warn!(title, error = %e, "Undecodable page-view response");
                Attempt::Done(ViewOutcome::Failed(FetchFailure::Decode(e.to_string())))
            }
        }
    }
}

impl ViewSource for PageviewsClient {
    async fn fetch(&self, title: &str) -> ViewOutcome {
        let url = self.url_for(title);
        debug!(title, url = %url, "Querying page views");

        let mut attempt = 1;
        loop {
            match self.attempt(title, &url).await {
                Attempt::Done(outcome) => return outcome,
                Attempt::Transient(error) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(title, attempt, error = %error, "Transport error, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Attempt::Transient(error) => {
                    warn!(title, attempt, error = %error, "Transport error, giving up");
                    return ViewOutcome::Failed(FetchFailure::Transport(error));
                }
            }
        }
    }
}

/// Title-keyed outcomes, written concurrently by fetch workers.
#[derive(Debug, Default)]
pub struct ViewResults {
    outcomes: DashMap<String, ViewOutcome>,
}

impl ViewResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, title: String, outcome: ViewOutcome) {
        self.outcomes.insert(title, outcome);
    }

    pub fn get(&self, title: &str) -> Option<ViewOutcome> {
        self.outcomes.get(title).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, title: &str) -> bool {
        self.outcomes.contains_key(title)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Successful results, sorted by title.
    pub fn fetched(&self) -> Vec<ViewFetchResult> {
        let mut out: Vec<_> = self
            .outcomes
            .iter()
            .filter_map(|entry| {
                entry.value().total().map(|total_views| ViewFetchResult {
                    title: entry.key().clone(),
                    total_views,
                })
            })
            .collect();
        out.sort_by(|a, b| a.title.cmp(&b.title));
        out
    }

    /// Titles whose fetch failed, sorted.
    pub fn failed(&self) -> Vec<String> {
        let mut out: Vec<_> = self
            .outcomes
            .iter()
            .filter(|entry| entry.value().total().is_none())
            .map(|entry| entry.key().clone())
            .collect();
        out.sort();
        out
    }

    /// All outcomes sorted by title.
    pub fn sorted(&self) -> Vec<(String, ViewOutcome)> {
        let mut out: Vec<_> = self
            .outcomes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl FromIterator<(String, ViewOutcome)> for ViewResults {
    fn from_iter<I: IntoIterator<Item = (String, ViewOutcome)>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

fn spawn_fetch<S: ViewSource>(
    source: &Arc<S>,
    title: String,
    results: &Arc<ViewResults>,
    stats: &Arc<PipelineStats>,
) -> JoinHandle<()> {
    let source = Arc::clone(source);
    let results = Arc::clone(results);
    let stats = Arc::clone(stats);
    tokio::spawn(async move {
        let outcome = match AssertUnwindSafe(source.fetch(&title)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(title = %title, "Fetch task panicked");
                ViewOutcome::Failed(FetchFailure::Cancelled("fetch task panicked".to_string()))
            }
        };
        match outcome {
            ViewOutcome::Fetched(_) => stats.inc_fetched(),
            ViewOutcome::Failed(_) => stats.inc_failed(),
        }
        results.insert(title, outcome);
    })
}

/// Fetches views for every distinct title with at most `concurrency`
/// requests in flight.
///
/// When `deadline` expires, in-flight requests are aborted and every title
/// without an outcome is recorded as [`FetchFailure::DeadlineExceeded`].
/// A source that panics is recorded as [`FetchFailure::Cancelled`] as soon
/// as it happens. Titles are borrowed from `titles` and copied only when a
/// request is spawned.
pub async fn fetch_views<S, I>(
    source: Arc<S>,
    titles: I,
    concurrency: usize,
    deadline: Option<Duration>,
    stats: Arc<PipelineStats>,
) -> ViewResults
where
    S: ViewSource,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let items: Vec<I::Item> = titles.into_iter().collect();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let titles: Vec<&str> = items
        .iter()
        .map(AsRef::<str>::as_ref)
        .filter(|title| seen.insert(*title))
        .collect();
    drop(seen);

    if titles.is_empty() {
        return ViewResults::new();
    }
    let results = Arc::new(ViewResults::new());

    let concurrency = concurrency.max(1);
    let deadline_at = deadline.map(|d| Instant::now() + d);
    let pb = make_progress_bar(titles.len() as u64);

    info!(
        titles = titles.len(),
        concurrency,
        deadline_secs = deadline.map(|d| d.as_secs_f64()),
        "Starting page-view fetch"
    );

    let mut in_flight = FuturesUnordered::new();
    let mut queue = titles.iter();
    for title in queue.by_ref().take(concurrency) {
        in_flight.push(spawn_fetch(&source, title.to_string(), &results, &stats));
    }

    let mut expired = false;
    loop {
        let next = match deadline_at {
            Some(at) => match tokio::time::timeout_at(at, in_flight.next()).await {
                Ok(next) => next,
                Err(_) => {
                    expired = true;
                    break;
                }
            },
            None => in_flight.next().await,
        };
        let Some(joined) = next else {
            break;
        };
        if let Err(e) = joined {
            warn!(error = %e, "Fetch task did not complete");
        }
        pb.inc(1);

        if let Some(title) = queue.next() {
            in_flight.push(spawn_fetch(&source, title.to_string(), &results, &stats));
        }
    }

    if expired {
        warn!(in_flight = in_flight.len(), "Fetch deadline exceeded, aborting in-flight requests");
        for handle in in_flight.iter() {
            handle.abort();
        }
        // Wait for the aborts to land so no worker writes after the sweep below
        while in_flight.next().await.is_some() {}
    }

    // Tasks record their own outcome, panics included, so only titles that
    // were pending or never started are missing here
    let reason = if expired {
        FetchFailure::DeadlineExceeded
    } else {
        FetchFailure::Cancelled("fetch task did not complete".to_string())
    };
    let mut missing = 0u64;
    for title in &titles {
        if !results.contains(title) {
            results.insert(title.to_string(), ViewOutcome::Failed(reason.clone()));
            missing += 1;
        }
    }
    if expired {
        stats.add_deadline_failures(missing);
    } else {
        for _ in 0..missing {
            stats.inc_failed();
        }
    }

    pb.finish_and_clear();
    info!(
        fetched = stats.fetched(),
        failed = stats.failed(),
        "Page-view fetch complete"
    );

    Arc::try_unwrap(results).unwrap_or_else(|shared| shared.sorted().into_iter().collect())
}

/// Builds the HTTP client from `config` and fetches views for `titles`.
pub async fn run_fetch<I>(
    titles: I,
    config: &PipelineConfig,
    stats: Arc<PipelineStats>,
) -> Result<ViewResults>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    config.validate()?;
    let client = Arc::new(PageviewsClient::new(config)?);
    Ok(fetch_views(
        client,
        titles,
        config.concurrency,
        config.fetch_deadline,
        stats,
    )
    .await)
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("    {spinner:.cyan} Page views     [{bar:30.cyan/blue}] {pos}/{len} titles")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
