use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the parse pass and the fetch workers
#[derive(Default, Debug)]
pub struct PipelineStats {
    pub pages_seen: AtomicU64,
    pub articles_emitted: AtomicU64,
    pub pages_discarded: AtomicU64,
    pub bot_edits_skipped: AtomicU64,
    pub views_fetched: AtomicU64,
    pub views_failed: AtomicU64,
    pub deadline_failures: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages(&self) {
        self.pages_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_articles(&self) {
        self.articles_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discarded(&self) {
        self.pages_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bot_edits(&self) {
        self.bot_edits_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fetched(&self) {
        self.views_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.views_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_deadline_failures(&self, count: u64) {
        self.deadline_failures.fetch_add(count, Ordering::Relaxed);
        self.views_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn pages(&self) -> u64 {
        self.pages_seen.load(Ordering::Relaxed)
    }

    pub fn articles(&self) -> u64 {
        self.articles_emitted.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.pages_discarded.load(Ordering::Relaxed)
    }

    pub fn bot_edits(&self) -> u64 {
        self.bot_edits_skipped.load(Ordering::Relaxed)
    }

    pub fn fetched(&self) -> u64 {
        self.views_fetched.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.views_failed.load(Ordering::Relaxed)
    }

    pub fn deadline(&self) -> u64 {
        self.deadline_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn default_values_are_zero() {
        let stats = PipelineStats::new();
        assert_eq!(stats.pages(), 0);
        assert_eq!(stats.articles(), 0);
        assert_eq!(stats.discarded(), 0);
        assert_eq!(stats.bot_edits(), 0);
        assert_eq!(stats.fetched(), 0);
        assert_eq!(stats.failed(), 0);
        assert_eq!(stats.deadline(), 0);
    }

    #[test]
    fn parse_counters() {
        let stats = PipelineStats::new();
        stats.inc_pages();
        stats.inc_pages();
        stats.inc_pages();
        stats.inc_articles();
        stats.inc_discarded();
        stats.inc_discarded();
        stats.inc_bot_edits();
        assert_eq!(stats.pages(), 3);
        assert_eq!(stats.articles(), 1);
        assert_eq!(stats.discarded(), 2);
        assert_eq!(stats.bot_edits(), 1);
    }

    #[test]
    fn deadline_failures_count_as_failures() {
        let stats = PipelineStats::new();
        stats.inc_failed();
        stats.add_deadline_failures(4);
        assert_eq!(stats.failed(), 5);
        assert_eq!(stats.deadline(), 4);
    }

    #[test]
    fn concurrent_increments() {
        let stats = Arc::new(PipelineStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.inc_fetched();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.fetched(), 8000);
    }
}
