//! Harvest pipeline orchestration: fan-out searches, merge, dedupe, publish.

pub mod dedup;
pub mod driver;
pub mod export;
pub mod merge;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sghalal_adapters::{
    dedupe_terms, default_search_terms, MuisDirectoryAdapter, MuisEndpoints, SearchSource,
};
use sghalal_core::{HarvestMetadata, PublishedFile, RunDiagnostics};
use sghalal_storage::{
    BackoffPolicy, HttpClientConfig, HttpFetcher, PublishStore, TokenBucketConfig,
};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::driver::{DriverSettings, QueryDriver};
use crate::export::{CSV_FILE, JSON_FILE, METADATA_FILE};
use crate::merge::{harvest_terms, MergeLimits};

pub const CRATE_NAME: &str = "sghalal-sync";

pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36"
);

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub output_dir: PathBuf,
    pub api_url: String,
    pub page_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub concurrency: usize,
    pub request_interval_ms: u64,
    pub max_retries: usize,
    pub page_size: u32,
    pub max_pages: u32,
    pub run_budget_secs: u64,
    pub terms_file: PathBuf,
    /// Explicit term list; takes precedence over `terms_file`.
    pub term_overrides: Vec<String>,
    pub expand_variations: bool,
    pub max_establishments: Option<usize>,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        let endpoints = MuisEndpoints::default();
        Self {
            output_dir: std::env::var("HALAL_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            api_url: std::env::var("HALAL_API_URL").unwrap_or(endpoints.api_url),
            page_url: std::env::var("HALAL_PAGE_URL").unwrap_or(endpoints.page_url),
            user_agent: std::env::var("HALAL_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: env_parse("HALAL_HTTP_TIMEOUT_SECS").unwrap_or(10),
            concurrency: env_parse("HALAL_CONCURRENCY").unwrap_or(4),
            request_interval_ms: env_parse("HALAL_REQUEST_INTERVAL_MS").unwrap_or(250),
            max_retries: env_parse("HALAL_MAX_RETRIES").unwrap_or(3),
            page_size: env_parse("HALAL_PAGE_SIZE").unwrap_or(100),
            max_pages: env_parse("HALAL_MAX_PAGES").unwrap_or(50),
            run_budget_secs: env_parse("HALAL_RUN_BUDGET_SECS").unwrap_or(1800),
            terms_file: std::env::var("HALAL_TERMS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./search_terms.yaml")),
            term_overrides: Vec::new(),
            expand_variations: env_flag("HALAL_EXPAND_VARIATIONS"),
            max_establishments: env_parse("HALAL_MAX_ESTABLISHMENTS"),
            scheduler_enabled: env_flag("HALAL_SCHEDULER_ENABLED"),
            sync_cron: std::env::var("HALAL_SYNC_CRON")
                .unwrap_or_else(|_| "0 0 2 * * *".to_string()),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            ..BackoffPolicy::default()
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            concurrency: self.concurrency,
            backoff: self.backoff(),
            token_bucket: Some(TokenBucketConfig {
                capacity: 1,
                refill_every: Duration::from_millis(self.request_interval_ms),
            }),
        }
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            page_size: self.page_size,
            max_pages: self.max_pages,
            backoff: self.backoff(),
            expand_variations: self.expand_variations,
        }
    }

    /// Effective term list: explicit overrides, else the terms file when it
    /// exists, else the built-in list.
    pub fn search_terms(&self) -> Result<Vec<String>> {
        if !self.term_overrides.is_empty() {
            return Ok(dedupe_terms(self.term_overrides.iter().cloned()));
        }
        if self.terms_file.exists() {
            return load_terms_file(&self.terms_file);
        }
        Ok(default_search_terms())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SearchTermsFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    terms: Vec<String>,
}

pub fn load_terms_file(path: &Path) -> Result<Vec<String>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: SearchTermsFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let terms = dedupe_terms(file.terms);
    if terms.is_empty() {
        anyhow::bail!("{} lists no search terms", path.display());
    }
    Ok(terms)
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(
        "harvest produced no usable records ({failed} of {total} terms failed); \
         published files left untouched"
    )]
    NoRecords {
        total: usize,
        failed: usize,
        failed_terms: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_establishments: usize,
    pub partial: bool,
    pub failed_terms: Vec<String>,
    pub conflicts: usize,
    pub output_dir: String,
    pub files: Vec<PublishedFile>,
}

pub struct HarvestPipeline {
    config: HarvestConfig,
    source: Arc<dyn SearchSource>,
    store: PublishStore,
}

impl HarvestPipeline {
    /// Pipeline wired to the live MUIS directory.
    pub fn new(config: HarvestConfig) -> Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        let adapter = MuisDirectoryAdapter::new(
            http,
            MuisEndpoints {
                api_url: config.api_url.clone(),
                page_url: config.page_url.clone(),
            },
        );
        Ok(Self::with_source(config, Arc::new(adapter)))
    }

    pub fn with_source(config: HarvestConfig, source: Arc<dyn SearchSource>) -> Self {
        let store = PublishStore::new(config.output_dir.clone());
        Self {
            config,
            source,
            store,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<HarvestSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let budget = Duration::from_secs(self.config.run_budget_secs);
        let deadline = tokio::time::Instant::now() + budget;
        let terms = self.config.search_terms()?;
        info!(%run_id, source = self.source.source_id(), terms = terms.len(), "starting harvest");

        match tokio::time::timeout_at(deadline, self.source.prepare()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "source preparation failed; continuing without it"),
            Err(_) => warn!("source preparation ran out of time; continuing without it"),
        }

        let driver = QueryDriver::new(self.source.as_ref(), self.config.driver_settings());
        let merged = harvest_terms(
            &driver,
            &terms,
            MergeLimits {
                concurrency: self.config.concurrency,
                deadline,
                max_establishments: self.config.max_establishments,
            },
        )
        .await;

        let every_term_failed = merged.terms_completed == 0 && !merged.failed_terms.is_empty();
        if merged.dedup.is_empty() || every_term_failed {
            error!(
                %run_id,
                failed = merged.failed_terms.len(),
                unfinished = merged.unfinished_terms.len(),
                "no establishments harvested; keeping previously published files"
            );
            return Err(HarvestError::NoRecords {
                total: terms.len(),
                failed: merged.failed_terms.len(),
                failed_terms: merged.failed_terms,
            }
            .into());
        }

        let finished_at = Utc::now();
        let conflicts = merged.dedup.conflicts();
        if conflicts > 0 {
            info!(
                conflicts,
                numbers = ?merged.dedup.conflicting_numbers(),
                "resolved conflicting records by term order"
            );
        }
        let records = merged.dedup.into_sorted();
        let stats = stats::compute_stats(&records, finished_at);

        let diagnostics = RunDiagnostics {
            run_id,
            started_at,
            finished_at,
            terms_total: terms.len(),
            terms_completed: merged.terms_completed,
            failed_terms: merged.failed_terms,
            unfinished_terms: merged.unfinished_terms,
            pages_fetched: merged.pages,
            raw_records: merged.raw_records,
            dropped_records: merged.dropped_records,
            conflicts,
            timed_out: merged.timed_out,
            capped: merged.capped,
        };
        if diagnostics.dropped_records > 0 {
            warn!(
                dropped = diagnostics.dropped_records,
                "malformed records dropped during harvest"
            );
        }

        let csv = export::establishments_csv(&records)?;
        let json = export::establishments_json(&records)?;
        let files = vec![
            checksum_entry(CSV_FILE, &csv),
            checksum_entry(JSON_FILE, &json),
        ];
        let metadata = HarvestMetadata::new(stats, diagnostics, files);
        let metadata_bytes = export::metadata_json(&metadata)?;

        let published = self
            .store
            .publish(&[(CSV_FILE, csv), (JSON_FILE, json), (METADATA_FILE, metadata_bytes)])
            .await
            .context("publishing harvest outputs")?;

        info!(
            %run_id,
            total = metadata.total_establishments,
            types = metadata.types.len(),
            schemes = metadata.schemes.len(),
            partial = metadata.partial,
            failed_terms = metadata.failed_terms.len(),
            output_dir = %self.store.root().display(),
            "harvest published"
        );

        Ok(HarvestSummary {
            run_id,
            started_at,
            finished_at,
            total_establishments: metadata.total_establishments,
            partial: metadata.partial,
            failed_terms: metadata.failed_terms,
            conflicts,
            output_dir: self.store.root().display().to_string(),
            files: published,
        })
    }

    /// Cron scheduler that runs the harvest on `sync_cron`, or `None` when
    /// the scheduler is disabled.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.as_str();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        total = summary.total_establishments,
                        partial = summary.partial,
                        "scheduled harvest complete"
                    ),
                    Err(err) => error!(error = %err, "scheduled harvest failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

fn checksum_entry(name: &str, bytes: &[u8]) -> PublishedFile {
    PublishedFile {
        name: name.to_string(),
        sha256: PublishStore::sha256_hex(bytes),
        bytes: bytes.len() as u64,
    }
}

pub async fn run_harvest_once_from_env() -> Result<HarvestSummary> {
    HarvestPipeline::new(HarvestConfig::from_env())?.run_once().await
}

/// Markdown summary of the dataset currently published in `output_dir`.
pub fn report_markdown(output_dir: &Path) -> Result<String> {
    let metadata_path = output_dir.join(METADATA_FILE);
    let metadata: HarvestMetadata = serde_json::from_str(
        &std::fs::read_to_string(&metadata_path)
            .with_context(|| format!("reading {}", metadata_path.display()))?,
    )
    .with_context(|| format!("parsing {}", metadata_path.display()))?;

    let csv_path = output_dir.join(CSV_FILE);
    let json_path = output_dir.join(JSON_FILE);
    let csv_rows = export::read_establishments_csv(
        &std::fs::read(&csv_path).with_context(|| format!("reading {}", csv_path.display()))?,
    )?
    .len();
    let json_rows = export::read_establishments_json(
        &std::fs::read(&json_path).with_context(|| format!("reading {}", json_path.display()))?,
    )?
    .len();

    let diag = &metadata.diagnostics;
    let mut lines = vec![
        "# Halal Establishments Harvest".to_string(),
        String::new(),
        format!("- Run ID: `{}`", diag.run_id),
        format!("- Last updated: {}", metadata.last_updated.to_rfc3339()),
        format!("- Establishments: {}", metadata.total_establishments),
        format!("- CSV rows: {csv_rows}"),
        format!("- JSON rows: {json_rows}"),
        format!(
            "- Terms: {} completed, {} failed, {} unfinished of {}",
            diag.terms_completed,
            diag.failed_terms.len(),
            diag.unfinished_terms.len(),
            diag.terms_total
        ),
        format!("- Conflicts resolved: {}", diag.conflicts),
        format!("- Dropped records: {}", diag.dropped_records),
        format!("- Partial run: {}", if metadata.partial { "yes" } else { "no" }),
    ];
    if csv_rows != metadata.total_establishments || json_rows != metadata.total_establishments {
        lines.push("- **Warning:** published files disagree with metadata".to_string());
    }
    if !metadata.failed_terms.is_empty() {
        lines.push(format!(
            "- Failed terms: {}",
            metadata
                .failed_terms
                .iter()
                .map(|t| format!("`{t}`"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    lines.push(String::new());
    lines.push("## Types".to_string());
    lines.extend(metadata.types.iter().map(|(k, v)| format!("- {}: {}", display_group(k), v)));
    lines.push(String::new());
    lines.push("## Schemes".to_string());
    lines.extend(metadata.schemes.iter().map(|(k, v)| format!("- {}: {}", display_group(k), v)));
    lines.push(String::new());

    Ok(lines.join("\n"))
}

fn display_group(key: &str) -> &str {
    if key.is_empty() {
        "(unspecified)"
    } else {
        key
    }
}
