use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Finalized per-article aggregate. Never mutated after the page closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub title: String,
    #[serde(rename = "edits")]
    pub edit_count: u64,
    #[serde(rename = "editors")]
    pub editor_count: u64,
    /// `YYYY-MM-DD` of the first revision seen; unset for a page with no revisions
    pub inception_date: Option<String>,
}

/// Title-keyed table of finalized records, kept in dump order.
#[derive(Debug, Default)]
pub struct ArticleStatsTable {
    records: Vec<ArticleRecord>,
    by_title: FxHashMap<String, usize>,
}

impl ArticleStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing (in place) any earlier one with the same
    /// title. Returns the replaced record.
    pub fn insert(&mut self, record: ArticleRecord) -> Option<ArticleRecord> {
        match self.by_title.get(&record.title) {
            Some(&slot) => Some(std::mem::replace(&mut self.records[slot], record)),
            None => {
                self.by_title
                    .insert(record.title.clone(), self.records.len());
                self.records.push(record);
                None
            }
        }
    }

    pub fn get(&self, title: &str) -> Option<&ArticleRecord> {
        self.by_title.get(title).map(|&slot| &self.records[slot])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArticleRecord> {
        self.records.iter()
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.title.as_str())
    }
}

impl FromIterator<ArticleRecord> for ArticleStatsTable {
    fn from_iter<I: IntoIterator<Item = ArticleRecord>>(iter: I) -> Self {
        let mut table = Self::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}

/// Page views summed over the configured range for one title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFetchResult {
    pub title: String,
    pub total_views: u64,
}
