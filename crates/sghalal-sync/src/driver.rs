//! Per-term query execution: pagination, page-level retry, variations.

use sghalal_adapters::{
    normalize, term_variations, PageQuery, SearchPage, SearchSource, SourceError,
};
use sghalal_core::Establishment;
use sghalal_storage::{BackoffPolicy, RetryDisposition};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub page_size: u32,
    pub max_pages: u32,
    pub backoff: BackoffPolicy,
    pub expand_variations: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 50,
            backoff: BackoffPolicy::default(),
            expand_variations: false,
        }
    }
}

/// Everything one search term produced, in page order.
#[derive(Debug, Clone, Default)]
pub struct TermOutcome {
    /// Position of the term in the configured list; merge order follows it.
    pub index: usize,
    pub term: String,
    pub records: Vec<Establishment>,
    pub pages: usize,
    pub raw_records: usize,
    pub dropped: usize,
    /// Set when the term was abandoned. Records from pages fetched before the
    /// failure are kept.
    pub error: Option<String>,
}

impl TermOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

pub struct QueryDriver<'a> {
    source: &'a dyn SearchSource,
    settings: DriverSettings,
}

impl<'a> QueryDriver<'a> {
    pub fn new(source: &'a dyn SearchSource, settings: DriverSettings) -> Self {
        Self { source, settings }
    }

    /// Fetch every page for `term`, plus its variations when enabled and the
    /// term itself produced results. Never fails: errors are recorded on the
    /// outcome.
    pub async fn harvest_term(&self, index: usize, term: &str) -> TermOutcome {
        let mut outcome = TermOutcome {
            index,
            term: term.to_string(),
            ..Default::default()
        };

        if let Err(err) = self.collect_pages(term, &mut outcome).await {
            warn!(term, error = %err, pages = outcome.pages, "abandoning search term");
            outcome.error = Some(err.to_string());
            return outcome;
        }
        debug!(term, records = outcome.records.len(), pages = outcome.pages, "term complete");

        if self.settings.expand_variations && !outcome.records.is_empty() {
            for variation in term_variations(term) {
                let before = outcome.records.len();
                match self.collect_pages(&variation, &mut outcome).await {
                    Ok(()) => debug!(
                        term,
                        variation = %variation,
                        added = outcome.records.len() - before,
                        "variation complete"
                    ),
                    Err(err) => warn!(
                        term,
                        variation = %variation,
                        error = %err,
                        "variation failed; continuing"
                    ),
                }
            }
        }
        outcome
    }

    async fn collect_pages(
        &self,
        term: &str,
        outcome: &mut TermOutcome,
    ) -> Result<(), SourceError> {
        let page_size = self.settings.page_size.max(1);
        let mut seen = 0u64;
        let mut previous_numbers: Option<Vec<String>> = None;

        for page in 1..=self.settings.max_pages.max(1) {
            let query = PageQuery {
                term: term.to_string(),
                page,
                page_size,
            };
            let result = self.fetch_page_with_retry(&query).await?;
            outcome.pages += 1;

            let numbers = page_numbers(&result);
            if previous_numbers.as_ref() == Some(&numbers) && !numbers.is_empty() {
                debug!(term, page, "page repeats the previous one; upstream ignores paging");
                return Ok(());
            }

            let returned = result.returned();
            outcome.raw_records += returned;
            outcome.dropped += result.dropped;
            for raw in &result.records {
                match normalize(raw) {
                    Some(record) => outcome.records.push(record),
                    None => outcome.dropped += 1,
                }
            }
            if result.dropped > 0 {
                info!(term, page, dropped = result.dropped, "dropped malformed records");
            }

            seen += returned as u64;
            // A short page ends the term; an oversized one means the page size
            // was ignored and everything came back at once.
            if returned != page_size as usize {
                return Ok(());
            }
            if result.total_records.is_some_and(|total| seen >= total) {
                return Ok(());
            }
            previous_numbers = Some(numbers);
        }

        warn!(
            term,
            max_pages = self.settings.max_pages,
            "page cap reached; results may be truncated"
        );
        Ok(())
    }

    async fn fetch_page_with_retry(&self, query: &PageQuery) -> Result<SearchPage, SourceError> {
        let backoff = self.settings.backoff;
        let mut attempt = 0usize;
        loop {
            match self.source.fetch_page(query).await {
                Ok(page) => return Ok(page),
                Err(err) => {
                    let retryable = err.retry_disposition() == RetryDisposition::Retryable;
                    if retryable && attempt < backoff.max_retries {
                        let delay = backoff.delay_for_attempt(attempt);
                        warn!(
                            term = %query.term,
                            page = query.page,
                            attempt,
                            error = %err,
                            ?delay,
                            "retrying page"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

fn page_numbers(page: &SearchPage) -> Vec<String> {
    page.records
        .iter()
        .filter_map(|r| r.number.clone())
        .collect()
}
