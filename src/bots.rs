use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::info;

/// Known automated-editor account names. Built once, then only queried.
#[derive(Debug, Default, Clone)]
pub struct BotRegistry {
    names: FxHashSet<String>,
}

impl BotRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Reads one account name per line. Blank lines and `#` comments are skipped;
    /// surrounding whitespace is trimmed the same way the scraped table cells are.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut names = FxHashSet::default();
        for line in reader.lines() {
            let line = line.context("Failed to read bot list")?;
            let name = line.trim();
            if name.is_empty() || name.starts_with('#') {
                continue;
            }
            names.insert(name.to_string());
        }
        Ok(Self { names })
    }

    pub fn load(path: &str) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open bot list: {}", path))?;
        let registry = Self::from_reader(BufReader::new(file))?;
        info!(bots = registry.len(), "Loaded bot registry from {}", path);
        Ok(registry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> &FxHashSet<String> {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
