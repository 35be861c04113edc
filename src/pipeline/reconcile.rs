//! Page reconciliation: turn one vote page into store writes.
//!
//! A page is the unit of work. Header and table are parsed first, without
//! touching the store, so a template mismatch never leaves partial rows.
//! The writes then run in one transaction:
//!
//! 1. upsert council, session and vote by natural key
//! 2. when the page has a table, upsert deputies and voices and prune voices
//!    of deputies missing from the page
//! 3. recompute and store the vote's tally
//!
//! Any error rolls the transaction back. Write conflicts from concurrent
//! workers (`SQLITE_BUSY` / `SQLITE_LOCKED`) are retried with exponential
//! backoff (`backoff * 2^(retry - 1)`); every other error fails the page at
//! once.

use crate::error::{PageError, StoreError};
use crate::model::{Tally, VoteId, VoteKey};
use crate::pipeline::classify::is_vote_page;
use crate::pipeline::header::{parse_header, VoteHeader};
use crate::pipeline::source::{PageSource, TableGrid};
use crate::pipeline::table::{extract_roster, record_roster, RosterEntry, RosterOutcome};
use crate::pipeline::tally::recalculate;
use crate::store::RecordStore;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest single wait between two transaction attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How often a page transaction is retried after a write conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base delay; doubled on each further attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff
            .checked_mul(factor)
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

/// What one page contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Not a vote-result page; nothing was written.
    Skipped,
    Recorded(PageRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub vote: VoteId,
    pub vote_title: String,
    pub tally: Tally,
    /// `None` when the page carried no table.
    pub roster: Option<RosterOutcome>,
    /// Transaction attempts used, 1 when no conflict occurred.
    pub attempts: u32,
}

/// Applies pages to a [`RecordStore`].
///
/// One reconciler per worker; pages of one document go through it
/// sequentially.
pub struct Reconciler<'s, S: RecordStore + ?Sized> {
    store: &'s mut S,
    retry: RetryPolicy,
}

impl<'s, S: RecordStore + ?Sized> Reconciler<'s, S> {
    pub fn new(store: &'s mut S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Classify page `index` of `source` and record it when it is a vote page.
    ///
    /// The table is only requested for vote pages.
    pub fn process_page(
        &mut self,
        source: &mut dyn PageSource,
        index: usize,
    ) -> Result<PageOutcome, PageError> {
        let page_num = index + 1;
        let text = source.page_text(index)?;
        if !is_vote_page(&text) {
            debug!("Page {}: no vote marker, skipped", page_num);
            return Ok(PageOutcome::Skipped);
        }
        let table = source.page_table(index)?;
        self.record_page(page_num, &text, table.as_ref())
            .map(PageOutcome::Recorded)
    }

    /// Record an already classified vote page.
    pub fn record_page(
        &mut self,
        page_num: usize,
        text: &str,
        table: Option<&TableGrid>,
    ) -> Result<PageRecord, PageError> {
        let parse_failed = |source| PageError::Parse {
            page: page_num,
            source,
        };
        let header = parse_header(text).map_err(parse_failed)?;
        let roster = match table {
            Some(grid) => Some(extract_roster(grid).map_err(parse_failed)?),
            None => {
                debug!("Page {}: vote page without a table", page_num);
                None
            }
        };

        let mut last_err: Option<StoreError> = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let backoff = self.retry.delay(attempt);
                warn!(
                    "Page {}: store conflict, retry {}/{} after {:?}",
                    page_num, attempt, self.retry.max_retries, backoff
                );
                std::thread::sleep(backoff);
            }

            match self.apply_once(&header, roster.as_deref()) {
                Ok((vote, tally, roster)) => {
                    debug!(
                        "Page {}: vote {} '{}' recorded ({} for, {} against)",
                        page_num, vote, header.vote_title, tally.agree, tally.disagree
                    );
                    return Ok(PageRecord {
                        vote,
                        vote_title: header.vote_title,
                        tally,
                        roster,
                        attempts: attempt + 1,
                    });
                }
                Err(e) if e.is_conflict() => last_err = Some(e),
                Err(e) => {
                    return Err(PageError::Store {
                        page: page_num,
                        attempts: attempt + 1,
                        detail: e.to_string(),
                    })
                }
            }
        }

        Err(PageError::Store {
            page: page_num,
            attempts: self.retry.max_retries + 1,
            detail: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    /// One transaction attempt; rolled back on any error.
    fn apply_once(
        &mut self,
        header: &VoteHeader,
        roster: Option<&[RosterEntry]>,
    ) -> Result<(VoteId, Tally, Option<RosterOutcome>), StoreError> {
        self.store.begin()?;
        let result = self
            .write_page(header, roster)
            .and_then(|written| self.store.commit().map(|()| written));
        if let Err(e) = &result {
            if let Err(rollback_err) = self.store.rollback() {
                warn!("Rollback after '{}' failed: {}", e, rollback_err);
            }
        }
        result
    }

    fn write_page(
        &mut self,
        header: &VoteHeader,
        roster: Option<&[RosterEntry]>,
    ) -> Result<(VoteId, Tally, Option<RosterOutcome>), StoreError> {
        let council = self.store.upsert_council(&header.council_title)?;
        let session = self
            .store
            .upsert_session(&header.session_title, header.session_date)?;
        let vote = self.store.upsert_vote(&VoteKey {
            title: header.vote_title.clone(),
            vote_type: header.vote_type,
            council: council.id,
            session: session.id,
        })?;

        let roster = roster
            .map(|entries| record_roster(&mut *self.store, vote.id, entries))
            .transpose()?;
        let tally = recalculate(&mut *self.store, vote.id)?;
        Ok((vote.id, tally, roster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::model::{Decision, VoiceResult};
    use crate::pipeline::classify::VOTE_PAGE_MARKER;
    use crate::store::SqliteStore;

    fn page(title: &str) -> String {
        format!(
            "Броварська міська рада\n\
             18 чергова сесія 22.09.16\n\
             Результат поіменного голосування:\n{title}\n№: 5 В цілому\n\
             {VOTE_PAGE_MARKER}\n"
        )
    }

    fn grid(rows: &[(&str, &str)]) -> TableGrid {
        let mut all = vec![vec!["№", "ПІБ", "Результат", "№", "ПІБ", "Результат"]];
        for (name, result) in rows {
            all.push(vec!["", name, result, "", "", ""]);
        }
        TableGrid::from_rows(all)
    }

    #[test]
    fn record_page_creates_vote_and_tally() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut reconciler = Reconciler::new(&mut store, RetryPolicy::default());
        let record = reconciler
            .record_page(
                1,
                &page("Про бюджет"),
                Some(&grid(&[("Іваненко", "За"), ("Петренко", "За"), ("Бойко", "Проти")])),
            )
            .unwrap();
        assert_eq!(record.tally.agree, 2);
        assert_eq!(record.tally.disagree, 1);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.roster.as_ref().unwrap().created, 3);

        let vote = store.vote(record.vote).unwrap().unwrap();
        assert_eq!(vote.result(), Some(Decision::Accepted));
    }

    #[test]
    fn reprocessing_is_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let text = page("Про бюджет");
        let table = grid(&[("Іваненко", "За"), ("Петренко", "Відсутній")]);
        let mut reconciler = Reconciler::new(&mut store, RetryPolicy::default());
        let first = reconciler.record_page(1, &text, Some(&table)).unwrap();
        let second = reconciler.record_page(1, &text, Some(&table)).unwrap();

        assert_eq!(first.vote, second.vote);
        assert_eq!(first.tally, second.tally);
        let again = second.roster.unwrap();
        assert_eq!((again.created, again.updated, again.unchanged), (0, 0, 2));
        assert_eq!(store.list_voices(first.vote).unwrap().len(), 2);
    }

    #[test]
    fn deputy_missing_from_reprint_is_pruned() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let text = page("Про бюджет");
        let mut reconciler = Reconciler::new(&mut store, RetryPolicy::default());
        reconciler
            .record_page(1, &text, Some(&grid(&[("A", "За"), ("B", "Проти"), ("C", "За")])))
            .unwrap();
        let record = reconciler
            .record_page(1, &text, Some(&grid(&[("A", "За"), ("B", "За")])))
            .unwrap();

        assert_eq!(record.roster.unwrap().pruned, 1);
        assert_eq!(record.tally.agree, 2);
        assert_eq!(record.tally.disagree, 0);
        let c = store.find_deputy("C").unwrap();
        assert!(c.is_some(), "deputy rows are never deleted");
    }

    #[test]
    fn unknown_outcome_leaves_prior_state() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let text = page("Про бюджет");
        let mut reconciler = Reconciler::new(&mut store, RetryPolicy::default());
        let first = reconciler
            .record_page(1, &text, Some(&grid(&[("A", "За")])))
            .unwrap();
        let err = reconciler
            .record_page(1, &text, Some(&grid(&[("A", "Проти"), ("B", "Може")])))
            .unwrap_err();

        assert!(matches!(
            err,
            PageError::Parse {
                page: 1,
                source: ParseError::UnknownVoiceResult { .. }
            }
        ));
        let voices = store.list_voices(first.vote).unwrap();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].1, VoiceResult::For);
        assert!(store.find_deputy("B").unwrap().is_none());
    }

    #[test]
    fn page_without_table_still_stores_tally() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut reconciler = Reconciler::new(&mut store, RetryPolicy::default());
        let record = reconciler.record_page(3, &page("Про порядок денний"), None).unwrap();
        assert!(record.roster.is_none());
        assert_eq!(record.tally.total(), 0);
        assert_eq!(
            store.vote(record.vote).unwrap().unwrap().result(),
            Some(Decision::Rejected)
        );
    }

    #[test]
    fn header_error_touches_nothing() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut reconciler = Reconciler::new(&mut store, RetryPolicy::default());
        let text = format!("Результат поіменного голосування: Х №: 1\n{VOTE_PAGE_MARKER}");
        let err = reconciler.record_page(2, &text, None).unwrap_err();
        assert!(matches!(
            err,
            PageError::Parse {
                page: 2,
                source: ParseError::MissingCouncilTitle
            }
        ));
        assert!(store.vote(VoteId(1)).unwrap().is_none());
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let retry = RetryPolicy {
            max_retries: 30,
            backoff: Duration::from_millis(u64::MAX),
        };
        assert_eq!(retry.delay(1), MAX_BACKOFF);
        assert_eq!(retry.delay(30), MAX_BACKOFF);
        let small = RetryPolicy {
            max_retries: 30,
            backoff: Duration::from_millis(50),
        };
        assert_eq!(small.delay(30), MAX_BACKOFF);
    }

    #[test]
    fn page_without_table_keeps_existing_voices() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let text = page("Про бюджет");
        let mut reconciler = Reconciler::new(&mut store, RetryPolicy::default());
        let first = reconciler
            .record_page(1, &text, Some(&grid(&[("A", "За"), ("B", "Проти"), ("C", "За")])))
            .unwrap();
        let again = reconciler.record_page(1, &text, None).unwrap();

        assert_eq!(again.vote, first.vote);
        assert!(again.roster.is_none());
        assert_eq!(again.tally, first.tally);
        let voices = store.list_voices(first.vote).unwrap();
        assert_eq!(voices.len(), 3);
        let stored = store.vote(first.vote).unwrap().unwrap();
        assert_eq!(stored.tally().agree, 2);
        assert_eq!(stored.tally().disagree, 1);
        assert_eq!(stored.result(), Some(Decision::Accepted));
    }
}
