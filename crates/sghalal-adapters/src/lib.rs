//! Upstream directory contract, MUIS search adapter and record normalizer.

mod terms;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sghalal_core::Establishment;
use sghalal_storage::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, REFERER};
use sghalal_storage::{FetchError, HttpFetcher, RetryDisposition};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use terms::{dedupe_terms, default_search_terms, term_variations};

pub const CRATE_NAME: &str = "sghalal-adapters";

pub const DEFAULT_API_URL: &str = "https://halal.muis.gov.sg/api/halal/establishments";
pub const DEFAULT_PAGE_URL: &str = "https://halal.muis.gov.sg/halal/establishments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    pub term: String,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

/// Record exactly as the directory returned it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEstablishment {
    pub id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub sub_scheme_text: Option<String>,
    pub number: Option<String>,
    pub scheme_text: Option<String>,
    pub postal: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub records: Vec<RawEstablishment>,
    /// Entries in the payload that could not be read as an establishment.
    pub dropped: usize,
    pub total_records: Option<u64>,
}

impl SearchPage {
    /// Number of entries the upstream returned on this page, usable or not.
    pub fn returned(&self) -> usize {
        self.records.len() + self.dropped
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed search payload: {0}")]
    Malformed(String),
    #[error("{0}")]
    Message(String),
}

impl SourceError {
    /// HTTP-level failures have already been retried by the fetcher; only a
    /// payload that did not parse is worth asking for again.
    pub fn retry_disposition(&self) -> RetryDisposition {
        match self {
            Self::Malformed(_) => RetryDisposition::Retryable,
            Self::Fetch(_) | Self::Message(_) => RetryDisposition::NonRetryable,
        }
    }
}

#[async_trait]
pub trait SearchSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// One-off setup before the first search (session tokens and the like).
    async fn prepare(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<SearchPage, SourceError>;
}

#[derive(Debug, Clone)]
pub struct MuisEndpoints {
    pub api_url: String,
    pub page_url: String,
}

impl Default for MuisEndpoints {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_url: DEFAULT_PAGE_URL.to_string(),
        }
    }
}

/// Search adapter for the MUIS halal establishment directory.
#[derive(Debug)]
pub struct MuisDirectoryAdapter {
    http: HttpFetcher,
    endpoints: MuisEndpoints,
    csrf_token: RwLock<Option<String>>,
}

impl MuisDirectoryAdapter {
    pub fn new(http: HttpFetcher, endpoints: MuisEndpoints) -> Self {
        Self {
            http,
            endpoints,
            csrf_token: RwLock::new(None),
        }
    }

    async fn api_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        if let Ok(referer) = HeaderValue::from_str(&self.endpoints.page_url) {
            headers.insert(REFERER, referer);
        }
        if let Some(token) = self.csrf_token.read().await.as_deref() {
            match HeaderValue::from_str(token) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static("x-csrf-token"), value);
                }
                Err(_) => debug!("discovered csrf token is not a valid header value"),
            }
        }
        headers
    }
}

#[async_trait]
impl SearchSource for MuisDirectoryAdapter {
    fn source_id(&self) -> &'static str {
        "muis-halal-directory"
    }

    async fn prepare(&self) -> Result<(), SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        let page = self.http.get(&self.endpoints.page_url, headers).await?;
        match discover_csrf_token(&page.text())? {
            Some(token) => {
                info!("found csrf token on directory page");
                *self.csrf_token.write().await = Some(token);
            }
            None => warn!(
                url = %self.endpoints.page_url,
                "no csrf token found; searching without one"
            ),
        }
        Ok(())
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<SearchPage, SourceError> {
        let body = json!({
            "text": query.term,
            "page": query.page,
            "pageSize": query.page_size,
        });
        let headers = self.api_headers().await;
        let response = self
            .http
            .post_json(&self.endpoints.api_url, headers, &body)
            .await?;
        parse_search_response(&response.body)
    }
}

/// Parse a `{"data": [...], "totalRecords": n}` search response.
///
/// A missing or null `data` is an empty result, not an error. Entries that are
/// not objects or carry no certification number are counted as dropped.
pub fn parse_search_response(body: &[u8]) -> Result<SearchPage, SourceError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|e| SourceError::Malformed(format!("invalid JSON: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(SourceError::Malformed("response is not a JSON object".to_string()));
    };

    let total_records = object.get("totalRecords").and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    });

    let entries = match object.get("data") {
        None | Some(JsonValue::Null) => {
            return Ok(SearchPage {
                records: Vec::new(),
                dropped: 0,
                total_records,
            })
        }
        Some(JsonValue::Array(entries)) => entries,
        Some(_) => return Err(SourceError::Malformed("`data` is not an array".to_string())),
    };

    let mut page = SearchPage {
        records: Vec::with_capacity(entries.len()),
        dropped: 0,
        total_records,
    };
    for entry in entries {
        match parse_raw_record(entry) {
            Some(record) => page.records.push(record),
            None => page.dropped += 1,
        }
    }
    Ok(page)
}

fn json_text(value: &JsonValue, key: &str) -> Option<String> {
    match value.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_raw_record(entry: &JsonValue) -> Option<RawEstablishment> {
    if !entry.is_object() {
        return None;
    }
    let number = json_text(entry, "number").filter(|n| !n.trim().is_empty())?;
    Some(RawEstablishment {
        id: json_text(entry, "id"),
        name: json_text(entry, "name"),
        address: json_text(entry, "address"),
        sub_scheme_text: json_text(entry, "subSchemeText"),
        number: Some(number),
        scheme_text: json_text(entry, "schemeText"),
        postal: json_text(entry, "postal"),
    })
}

fn clean(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

/// Map a raw record onto the published shape.
///
/// Returns `None` when the record has no certification number to key on.
pub fn normalize(raw: &RawEstablishment) -> Option<Establishment> {
    let number = clean(raw.number.as_deref());
    if number.is_empty() {
        return None;
    }
    let address = clean(raw.address.as_deref());
    let postal = match clean(raw.postal.as_deref()) {
        p if p.is_empty() => extract_postal(&address),
        p => p,
    };
    Some(Establishment {
        name: clean(raw.name.as_deref()),
        address,
        kind: clean(raw.sub_scheme_text.as_deref()),
        number,
        scheme: clean(raw.scheme_text.as_deref()),
        postal,
    })
}

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Last run of exactly six ASCII digits in `address`, or an empty string.
pub fn extract_postal(address: &str) -> String {
    DIGIT_RUN
        .find_iter(address)
        .filter(|m| m.len() == 6)
        .last()
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn select_first_attr(
    document: &Html,
    selector: &str,
    attr: &str,
) -> Result<Option<String>, SourceError> {
    let sel = Selector::parse(selector).map_err(|e| SourceError::Message(e.to_string()))?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string))
}

/// Look for an anti-forgery token on the directory's HTML page: a hidden form
/// input first, then a meta tag, then a `csrf_token: "..."` assignment in an
/// inline script.
pub fn discover_csrf_token(html: &str) -> Result<Option<String>, SourceError> {
    let document = Html::parse_document(html);

    let hidden_input = r#"input[name="__RequestVerificationToken"]"#;
    if let Some(token) = select_first_attr(&document, hidden_input, "value")? {
        return Ok(Some(token));
    }
    if let Some(token) = select_first_attr(&document, r#"meta[name="csrf-token"]"#, "content")? {
        return Ok(Some(token));
    }

    let pattern = Regex::new(r#"(?i)csrf[_-]?token['"]?\s*[:=]\s*['"]([^'"]+)['"]"#)
        .map_err(|e| SourceError::Message(e.to_string()))?;
    let scripts = Selector::parse("script").map_err(|e| SourceError::Message(e.to_string()))?;
    for script in document.select(&scripts) {
        let text = script.text().collect::<String>();
        if let Some(token) = pattern.captures(&text).and_then(|c| c.get(1)) {
            return Ok(Some(token.as_str().to_string()));
        }
    }
    Ok(None)
}
