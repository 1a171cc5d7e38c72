//! Fan-out over search terms, fan-in through a single deduplicating writer.
//!
//! Term fetches run concurrently on a bounded pool and may finish in any
//! order. Finished terms are parked in a reorder buffer and merged strictly in
//! term-list order, so last-write-wins conflict resolution does not depend on
//! network timing.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::dedup::Deduplicator;
use crate::driver::{QueryDriver, TermOutcome};

#[derive(Debug, Clone, Copy)]
pub struct MergeLimits {
    pub concurrency: usize,
    pub deadline: Instant,
    pub max_establishments: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MergeResult {
    pub dedup: Deduplicator,
    pub terms_completed: usize,
    pub failed_terms: Vec<String>,
    pub unfinished_terms: Vec<String>,
    pub pages: usize,
    pub raw_records: usize,
    pub dropped_records: usize,
    pub timed_out: bool,
    pub capped: bool,
}

struct MergeState {
    result: MergeResult,
    merged: Vec<bool>,
    merged_count: usize,
}

impl MergeState {
    fn new(term_count: usize) -> Self {
        Self {
            result: MergeResult::default(),
            merged: vec![false; term_count],
            merged_count: 0,
        }
    }

    fn absorb(&mut self, outcome: TermOutcome) {
        let result = &mut self.result;
        result.pages += outcome.pages;
        result.raw_records += outcome.raw_records;
        result.dropped_records += outcome.dropped;
        if outcome.failed() {
            result.failed_terms.push(outcome.term);
        } else {
            result.terms_completed += 1;
        }
        for record in outcome.records {
            result.dedup.insert(record);
        }
        self.merged[outcome.index] = true;
        self.merged_count += 1;
    }

    fn reached_cap(&self, cap: Option<usize>) -> bool {
        cap.is_some_and(|cap| self.result.dedup.len() >= cap)
    }
}

pub async fn harvest_terms(
    driver: &QueryDriver<'_>,
    terms: &[String],
    limits: MergeLimits,
) -> MergeResult {
    // Collected up front: a lazy closure over borrowed terms makes the run
    // future fail the `Send` bound the scheduler job needs.
    let jobs: Vec<_> = terms
        .iter()
        .enumerate()
        .map(|(index, term)| driver.harvest_term(index, term))
        .collect();
    let mut outcomes = stream::iter(jobs).buffer_unordered(limits.concurrency.max(1));

    let mut state = MergeState::new(terms.len());
    let mut parked: BTreeMap<usize, TermOutcome> = BTreeMap::new();
    let mut next = 0usize;

    'collect: loop {
        match tokio::time::timeout_at(limits.deadline, outcomes.next()).await {
            Ok(Some(outcome)) => {
                parked.insert(outcome.index, outcome);
                while let Some(outcome) = parked.remove(&next) {
                    state.absorb(outcome);
                    next += 1;
                    if state.merged_count % 10 == 0 {
                        info!(
                            merged = state.merged_count,
                            total = terms.len(),
                            unique = state.result.dedup.len(),
                            "harvest progress"
                        );
                    }
                    if state.reached_cap(limits.max_establishments) {
                        info!(
                            unique = state.result.dedup.len(),
                            "establishment cap reached; stopping"
                        );
                        state.result.capped = true;
                        break 'collect;
                    }
                }
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    merged = state.merged_count,
                    total = terms.len(),
                    "run budget exhausted; stopping early"
                );
                state.result.timed_out = true;
                break;
            }
        }
    }
    drop(outcomes);

    // Terms that finished after an unfinished predecessor still count once the
    // run stops on its budget; merge them in list order.
    if !state.result.capped {
        for (_, outcome) in std::mem::take(&mut parked) {
            state.absorb(outcome);
        }
    }

    let mut result = state.result;
    result.unfinished_terms = terms
        .iter()
        .zip(&state.merged)
        .filter(|(_, merged)| !**merged)
        .map(|(term, _)| term.clone())
        .collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverSettings;
    use async_trait::async_trait;
    use sghalal_adapters::{PageQuery, RawEstablishment, SearchPage, SearchSource, SourceError};
    use sghalal_storage::BackoffPolicy;
    use std::collections::HashMap;
    use std::time::Duration;

    fn raw(number: &str, name: &str) -> RawEstablishment {
        RawEstablishment {
            name: Some(name.to_string()),
            number: Some(number.to_string()),
            ..Default::default()
        }
    }

    /// Each term answers after its own delay, so completion order differs
    /// from list order.
    struct DelayedSource {
        answers: HashMap<String, (u64, Vec<RawEstablishment>)>,
    }

    #[async_trait]
    impl SearchSource for DelayedSource {
        fn source_id(&self) -> &'static str {
            "delayed"
        }

        async fn fetch_page(&self, query: &PageQuery) -> Result<SearchPage, SourceError> {
            let (delay_ms, records) = self
                .answers
                .get(&query.term)
                .cloned()
                .ok_or_else(|| SourceError::Message(format!("no answer for {}", query.term)))?;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(SearchPage {
                records,
                dropped: 0,
                total_records: None,
            })
        }
    }

    fn driver_settings() -> DriverSettings {
        DriverSettings {
            page_size: 50,
            max_pages: 5,
            backoff: BackoffPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            expand_variations: false,
        }
    }

    fn limits(concurrency: usize, budget: Duration) -> MergeLimits {
        MergeLimits {
            concurrency,
            deadline: Instant::now() + budget,
            max_establishments: None,
        }
    }

    #[tokio::test]
    async fn later_term_wins_even_when_it_finishes_first() {
        let mut answers = HashMap::new();
        answers.insert("a".to_string(), (60, vec![raw("EE-1", "From A")]));
        answers.insert("b".to_string(), (1, vec![raw("EE-1", "From B")]));
        let source = DelayedSource { answers };
        let driver = QueryDriver::new(&source, driver_settings());
        let terms = vec!["a".to_string(), "b".to_string()];

        let result = harvest_terms(&driver, &terms, limits(2, Duration::from_secs(10))).await;
        assert_eq!(result.dedup.conflicts(), 1);
        let records = result.dedup.into_sorted();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "From B");
    }

    #[tokio::test]
    async fn failed_terms_are_listed_and_do_not_stop_the_run() {
        let mut answers = HashMap::new();
        let mut terms = Vec::new();
        for i in 0..70 {
            let term = format!("t{i}");
            if i % 14 != 3 {
                answers.insert(term.clone(), (0, vec![raw(&format!("EE-{}", i % 20), &term)]));
            }
            terms.push(term);
        }
        let source = DelayedSource { answers };
        let driver = QueryDriver::new(&source, driver_settings());

        let result = harvest_terms(&driver, &terms, limits(4, Duration::from_secs(10))).await;
        assert_eq!(result.failed_terms, vec!["t3", "t17", "t31", "t45", "t59"]);
        assert_eq!(result.terms_completed, 65);
        assert!(result.unfinished_terms.is_empty());
        assert!(!result.timed_out);
        assert_eq!(result.dedup.len(), 20);
    }

    #[tokio::test]
    async fn budget_exhaustion_keeps_finished_terms() {
        let mut answers = HashMap::new();
        answers.insert("fast".to_string(), (1, vec![raw("EE-1", "Fast")]));
        answers.insert("slow".to_string(), (5_000, vec![raw("EE-2", "Slow")]));
        answers.insert("also-fast".to_string(), (1, vec![raw("EE-3", "Also Fast")]));
        let source = DelayedSource { answers };
        let driver = QueryDriver::new(&source, driver_settings());
        let terms = vec!["fast".to_string(), "slow".to_string(), "also-fast".to_string()];

        let result = harvest_terms(&driver, &terms, limits(3, Duration::from_millis(200))).await;
        assert!(result.timed_out);
        assert_eq!(result.unfinished_terms, vec!["slow"]);
        assert_eq!(result.terms_completed, 2);
        let numbers: Vec<_> = result.dedup.into_sorted().into_iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec!["EE-3", "EE-1"]);
    }

    #[tokio::test]
    async fn cap_stops_merging_once_reached() {
        let mut answers = HashMap::new();
        let terms: Vec<String> = (0..6).map(|i| format!("t{i}")).collect();
        for (i, term) in terms.iter().enumerate() {
            answers.insert(term.clone(), (0, vec![raw(&format!("EE-{i}"), term)]));
        }
        let source = DelayedSource { answers };
        let driver = QueryDriver::new(&source, driver_settings());
        let mut lim = limits(1, Duration::from_secs(10));
        lim.max_establishments = Some(3);

        let result = harvest_terms(&driver, &terms, lim).await;
        assert!(result.capped);
        assert!(!result.timed_out);
        assert_eq!(result.dedup.len(), 3);
        assert_eq!(result.unfinished_terms, vec!["t3", "t4", "t5"]);
    }
}
