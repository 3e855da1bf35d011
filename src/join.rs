use crate::config::CSV_WRITE_BUFFER;
use crate::models::{ArticleRecord, ArticleStatsTable};
use crate::views::{ViewOutcome, ViewResults};
use anyhow::{Context, Result};
use csv::{Reader, Writer, WriterBuilder};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const ARTICLES_HEADER: [&str; 4] = ["title", "edits", "editors", "inception_date"];
pub const VIEWS_HEADER: [&str; 3] = ["title", "views", "error"];
pub const JOINED_HEADER: [&str; 5] = ["title", "edits", "editors", "inception_date", "views"];

/// Page views for a joined row. `Unknown` is written as an empty cell so it
/// can never be read back as a genuine zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum Views {
    Known(u64),
    Unknown,
}

impl From<Option<u64>> for Views {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Views::Unknown, Views::Known)
    }
}

impl From<Views> for Option<u64> {
    fn from(value: Views) -> Self {
        match value {
            Views::Known(n) => Some(n),
            Views::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub title: String,
    pub edits: u64,
    pub editors: u64,
    pub inception_date: Option<String>,
    pub views: Views,
}

impl JoinedRecord {
    fn new(record: &ArticleRecord, views: Views) -> Self {
        Self {
            title: record.title.clone(),
            edits: record.edit_count,
            editors: record.editor_count,
            inception_date: record.inception_date.clone(),
            views,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    pub rows: usize,
    pub known: usize,
    pub unknown: usize,
}

/// One row per table entry, in table order. Titles without a successful
/// fetch (failed or never requested) get `Views::Unknown`.
pub fn join_results(table: &ArticleStatsTable, views: &ViewResults) -> Vec<JoinedRecord> {
    table
        .iter()
        .map(|record| {
            let v = match views.get(&record.title) {
                Some(ViewOutcome::Fetched(total)) => Views::Known(total),
                Some(ViewOutcome::Failed(_)) | None => Views::Unknown,
            };
            JoinedRecord::new(record, v)
        })
        .collect()
}

/// Row-oriented destination for joined records.
pub trait TabularSink {
    fn write_row(&mut self, row: &JoinedRecord) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

impl TabularSink for Vec<JoinedRecord> {
    fn write_row(&mut self, row: &JoinedRecord) -> Result<()> {
        self.push(row.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct CsvSink<W: Write> {
    writer: Writer<W>,
}

impl CsvSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {:?}", path))?;
        Self::new(BufWriter::with_capacity(CSV_WRITE_BUFFER, file))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(inner);
        writer.write_record(JOINED_HEADER)?;
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e.error()))
    }
}

impl<W: Write> TabularSink for CsvSink<W> {
    fn write_row(&mut self, row: &JoinedRecord) -> Result<()> {
        self.writer.serialize(row)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

pub fn emit<S: TabularSink>(rows: &[JoinedRecord], sink: &mut S) -> Result<JoinSummary> {
    let mut summary = JoinSummary::default();
    for row in rows {
        sink.write_row(row)?;
        summary.rows += 1;
        match row.views {
            Views::Known(_) => summary.known += 1,
            Views::Unknown => summary.unknown += 1,
        }
    }
    sink.finish()?;
    Ok(summary)
}

fn csv_writer(path: &Path, header: &[&str]) -> Result<Writer<BufWriter<File>>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::with_capacity(CSV_WRITE_BUFFER, file));
    writer.write_record(header)?;
    Ok(writer)
}

fn csv_reader(path: &Path) -> Result<Reader<BufReader<File>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    Ok(Reader::from_reader(BufReader::new(file)))
}

pub fn write_articles_csv(path: &Path, table: &ArticleStatsTable) -> Result<()> {
    let mut writer = csv_writer(path, &ARTICLES_HEADER)?;
    for record in table.iter() {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!(rows = table.len(), "Wrote article statistics to {:?}", path);
    Ok(())
}

pub fn read_articles_csv(path: &Path) -> Result<ArticleStatsTable> {
    let mut reader = csv_reader(path)?;
    let mut table = ArticleStatsTable::new();
    for result in reader.deserialize() {
        let record: ArticleRecord =
            result.with_context(|| format!("Malformed article row in {:?}", path))?;
        table.insert(record);
    }
    Ok(table)
}

#[derive(Serialize, Deserialize)]
struct ViewRow {
    title: String,
    views: Option<u64>,
    error: Option<String>,
}

/// Writes one row per outcome; failed titles keep an empty `views` cell and
/// the failure reason.
pub fn write_views_csv(path: &Path, results: &ViewResults) -> Result<()> {
    let mut writer = csv_writer(path, &VIEWS_HEADER)?;
    for (title, outcome) in results.sorted() {
        let row = match outcome {
            ViewOutcome::Fetched(total) => ViewRow {
                title,
                views: Some(total),
                error: None,
            },
            ViewOutcome::Failed(failure) => ViewRow {
                title,
                views: None,
                error: Some(failure.to_string()),
            },
        };
        writer.serialize(&row)?;
    }
    writer.flush()?;
    info!(rows = results.len(), "Wrote page views to {:?}", path);
    Ok(())
}

/// Loads fetched totals. Failed rows are skipped so they join as unknown.
pub fn read_views_csv(path: &Path) -> Result<ViewResults> {
    let mut reader = csv_reader(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: ViewRow = result.with_context(|| format!("Malformed view row in {:?}", path))?;
        if let Some(total) = row.views {
            rows.push((row.title, ViewOutcome::Fetched(total)));
        }
    }
    Ok(rows.into_iter().collect())
}

pub fn join_csv_files(articles: &Path, views: &Path, output: &Path) -> Result<JoinSummary> {
    let table = read_articles_csv(articles)?;
    let results = read_views_csv(views)?;
    let rows = join_results(&table, &results);
    let mut sink = CsvSink::create(output)?;
    let summary = emit(&rows, &mut sink)?;
    info!(
        rows = summary.rows,
        unknown = summary.unknown,
        "Joined statistics written to {:?}",
        output
    );
    Ok(summary)
}

/// Featured-article titles, one per line.
pub fn read_featured<R: BufRead>(reader: R) -> Result<FxHashSet<String>> {
    let mut titles = FxHashSet::default();
    for line in reader.lines() {
        let line = line.context("Failed to read featured list")?;
        let title = line.trim();
        if !title.is_empty() {
            titles.insert(title.to_string());
        }
    }
    Ok(titles)
}

/// Partitions a joined CSV into featured and remaining articles.
/// Returns `(featured, rest)` row counts.
pub fn split_featured(
    joined: &Path,
    featured: &FxHashSet<String>,
    featured_out: &Path,
    rest_out: &Path,
) -> Result<(usize, usize)> {
    let mut reader = csv_reader(joined)?;
    let mut featured_sink = CsvSink::create(featured_out)?;
    let mut rest_sink = CsvSink::create(rest_out)?;
    let (mut n_featured, mut n_rest) = (0usize, 0usize);

    for result in reader.deserialize() {
        let row: JoinedRecord =
            result.with_context(|| format!("Malformed joined row in {:?}", joined))?;
        if featured.contains(&row.title) {
            featured_sink.write_row(&row)?;
            n_featured += 1;
        } else {
            rest_sink.write_row(&row)?;
            n_rest += 1;
        }
    }

    featured_sink.finish()?;
    rest_sink.finish()?;
    info!(featured = n_featured, rest = n_rest, "Split joined rows by featured list");
    Ok((n_featured, n_rest))
}
