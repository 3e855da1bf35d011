//! Per-page aggregation over parser events.
//!
//! A page moves through `AwaitingNamespace -> Accumulating` and ends either
//! emitting an [`ArticleRecord`] or discarded because its namespace is not
//! the main article namespace. Discarded pages still see every event until
//! their closing tag, each handler just returns early.
//!
//! The inception date is the first `<timestamp>` seen for the page. Exports
//! list revisions oldest first, so this is the earliest revision for
//! well-formed dumps; out-of-order revisions are not re-sorted.

use crate::bots::BotRegistry;
use crate::error::DumpError;
use crate::models::ArticleRecord;
use crate::parser::{DumpEvent, Element, EventKind};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

/// Main (article) namespace key
const ARTICLE_NAMESPACE: &str = "0";

/// Length of the `YYYY-MM-DD` prefix of an ISO-8601 timestamp
const DATE_PREFIX_CHARS: usize = 10;

#[derive(Debug, Default)]
pub struct PageContext {
    title: Option<String>,
    inception_date: Option<String>,
    inception_captured: bool,
    /// Anonymous editors are keyed by literal IP, so dynamic addresses over-split
    editor_ids: FxHashSet<String>,
    edit_count: u64,
}

impl PageContext {
    fn observe(&mut self, element: Element, text: &str, bots: &BotRegistry) -> Step {
        match element {
            Element::Title => {
                self.title = Some(text.to_string());
                Step::Continue
            }
            Element::Timestamp => {
                if !self.inception_captured {
                    self.inception_date = Some(date_prefix(text).to_string());
                    self.inception_captured = true;
                }
                Step::Continue
            }
            Element::Ip => {
                self.record_edit(text);
                Step::Continue
            }
            Element::Username => {
                if bots.contains(text) {
                    debug!(username = text, "Bot edit skipped");
                    return Step::BotEditSkipped;
                }
                self.record_edit(text);
                Step::Continue
            }
            _ => Step::Continue,
        }
    }

    fn record_edit(&mut self, editor: &str) {
        self.edit_count += 1;
        if !self.editor_ids.contains(editor) {
            self.editor_ids.insert(editor.to_string());
        }
    }

    fn finalize(self, offset: usize) -> Result<ArticleRecord, DumpError> {
        let title = self.title.ok_or_else(|| DumpError::SchemaViolation {
            offset,
            detail: "page closed without a <title>".to_string(),
        })?;
        Ok(ArticleRecord {
            title,
            edit_count: self.edit_count,
            editor_count: self.editor_ids.len() as u64,
            inception_date: self.inception_date,
        })
    }
}

fn date_prefix(timestamp: &str) -> &str {
    let end = timestamp
        .char_indices()
        .nth(DATE_PREFIX_CHARS)
        .map_or(timestamp.len(), |(i, _)| i);
    &timestamp[..end]
}

/// `Idle` covers both "before the first page" and "after a page finalized".
#[derive(Debug, Default)]
pub enum PageState {
    #[default]
    Idle,
    AwaitingNamespace(PageContext),
    Accumulating(PageContext),
    Discarded,
}

/// What a single event did, so the driver can keep counters.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    BotEditSkipped,
    Emitted(ArticleRecord),
    Discarded,
}

#[derive(Debug, Default)]
pub struct ArticleAccumulator {
    state: PageState,
}

impl ArticleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event. `offset` is only used to locate schema violations.
    pub fn handle(
        &mut self,
        event: &DumpEvent<'_>,
        bots: &BotRegistry,
        offset: usize,
    ) -> Result<Step, DumpError> {
        let state = std::mem::take(&mut self.state);
        let (next, step) = advance(state, event, bots, offset)?;
        self.state = next;
        Ok(step)
    }
}

fn advance(
    state: PageState,
    event: &DumpEvent<'_>,
    bots: &BotRegistry,
    offset: usize,
) -> Result<(PageState, Step), DumpError> {
    match (event.kind, event.element) {
        (EventKind::Start, Element::Page) => Ok((
            PageState::AwaitingNamespace(PageContext::default()),
            Step::Continue,
        )),
        (EventKind::End, Element::Page) => match state {
            PageState::AwaitingNamespace(page) | PageState::Accumulating(page) => {
                let record = page.finalize(offset)?;
                trace!(title = %record.title, edits = record.edit_count, "Page finalized");
                Ok((PageState::Idle, Step::Emitted(record)))
            }
            PageState::Discarded => Ok((PageState::Idle, Step::Discarded)),
            PageState::Idle => Ok((PageState::Idle, Step::Continue)),
        },
        (EventKind::End, element) => Ok(match state {
            PageState::AwaitingNamespace(page) | PageState::Accumulating(page)
                if element == Element::Ns =>
            {
                if event.text.trim() == ARTICLE_NAMESPACE {
                    (PageState::Accumulating(page), Step::Continue)
                } else {
                    trace!(ns = event.text, "Non-article page discarded");
                    (PageState::Discarded, Step::Continue)
                }
            }
            PageState::AwaitingNamespace(mut page) => {
                let step = page.observe(element, event.text, bots);
                (PageState::AwaitingNamespace(page), step)
            }
            PageState::Accumulating(mut page) => {
                let step = page.observe(element, event.text, bots);
                (PageState::Accumulating(page), step)
            }
            other => (other, Step::Continue),
        }),
        (EventKind::Start, _) => Ok((state, Step::Continue)),
    }
}
