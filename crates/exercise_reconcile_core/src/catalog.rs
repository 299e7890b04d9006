use std::env;
use std::sync::LazyLock;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ReconcileConfig;

pub const DEFAULT_PAGE_SIZE: usize = 1_000;

static LEGACY_MEDIA_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|/)(\d+)\.[A-Za-z0-9]+(?:[?#].*)?$").expect("legacy media id pattern must compile")
});

/// One catalog entry as read from the backing store for the duration of a run.
///
/// `name` is stored lowercased; optional URL fields are `None` rather than empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalExerciseRecord {
    pub id: String,
    pub legacy_numeric_id: Option<u32>,
    pub name: String,
    pub display_name: Option<String>,
    pub media_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl CanonicalExerciseRecord {
    pub fn new(
        id: impl Into<String>,
        name: &str,
        display_name: Option<&str>,
        media_url: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> Self {
        let media_url = non_empty(media_url);
        Self {
            id: id.into().trim().to_string(),
            legacy_numeric_id: media_url.as_deref().and_then(extract_legacy_numeric_id),
            name: name.trim().to_lowercase(),
            display_name: non_empty(display_name),
            media_url,
            thumbnail_url: non_empty(thumbnail_url),
        }
    }

    pub fn has_media(&self) -> bool {
        self.media_url.is_some()
    }
}

/// Pull the legacy numeric id out of a media URL whose file stem is all digits,
/// e.g. `https://cdn.example/gifs/0042.gif?v=2` yields `42`.
pub fn extract_legacy_numeric_id(url: &str) -> Option<u32> {
    let captures = LEGACY_MEDIA_ID.captures(url.trim())?;
    captures.get(1)?.as_str().parse::<u32>().ok()
}

pub trait CatalogReadApi {
    fn fetch_page(&mut self, offset: usize, limit: usize) -> Result<Vec<CanonicalExerciseRecord>>;
    fn request_count(&self) -> usize;
}

/// Read every catalog record page by page until a short page signals the end.
///
/// Any page failure aborts the whole fetch; callers never see a partial set.
pub fn fetch_all_records<A: CatalogReadApi>(
    api: &mut A,
    page_size: usize,
) -> Result<Vec<CanonicalExerciseRecord>> {
    if page_size == 0 {
        bail!("catalog page size must be greater than zero");
    }

    let mut records = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = api
            .fetch_page(offset, page_size)
            .with_context(|| format!("failed to fetch catalog page at offset {offset}"))?;
        let fetched = page.len();
        debug!(offset, fetched, "fetched catalog page");
        records.extend(page);
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }

    info!(
        records = records.len(),
        requests = api.request_count(),
        "catalog fetch complete"
    );
    Ok(records)
}

#[derive(Debug, Clone)]
pub struct CatalogClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub user_agent: String,
    pub id_column: String,
    pub name_column: String,
    pub display_name_column: String,
    pub media_column: String,
    pub thumbnail_column: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl CatalogClientConfig {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        let catalog = &config.catalog;
        Self {
            base_url: config.catalog_url().unwrap_or_default(),
            api_key: env_value("CATALOG_API_KEY", ""),
            table: config.catalog_table(),
            user_agent: config.user_agent(),
            id_column: catalog.columns.id.clone(),
            name_column: catalog.columns.name.clone(),
            display_name_column: catalog.columns.display_name.clone(),
            media_column: catalog.columns.media_url.clone(),
            thumbnail_column: catalog.columns.thumbnail_url.clone(),
            timeout_ms: env_value_u64("CATALOG_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("CATALOG_RATE_LIMIT_MS", 200),
            max_retries: env_value_usize("CATALOG_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("CATALOG_RETRY_DELAY_MS", 500),
        }
    }

    fn select_clause(&self) -> String {
        format!(
            "id:{},name:{},display_name:{},media_url:{},thumbnail_url:{}",
            self.id_column,
            self.name_column,
            self.display_name_column,
            self.media_column,
            self.thumbnail_column
        )
    }
}

/// Blocking client for a PostgREST-style table endpoint.
pub struct CatalogClient {
    client: Client,
    config: CatalogClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl CatalogClient {
    pub fn new(config: CatalogClientConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            bail!(
                "catalog URL is not configured.\nSet CATALOG_URL or [catalog].url in the config file."
            );
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build catalog HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn table_url(&self) -> Result<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        let joined = format!("{base}/{}", self.config.table);
        Url::parse(&joined).with_context(|| format!("invalid CATALOG_URL: {joined}"))
    }

    fn request_rows(&mut self, params: &[(&str, String)]) -> Result<Vec<CatalogRow>> {
        let url = self.table_url()?;

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let mut request = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .header("Accept", "application/json")
                .query(params);
            if !self.config.api_key.is_empty() {
                request = request
                    .header("apikey", self.config.api_key.clone())
                    .bearer_auth(&self.config.api_key);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        let body = response.text().unwrap_or_default();
                        bail!(
                            "catalog request failed with HTTP {status}: {}",
                            body.trim()
                        );
                    }
                    return response
                        .json::<Vec<CatalogRow>>()
                        .context("failed to decode catalog JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call catalog API");
                }
            }
        }

        bail!("catalog request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl CatalogReadApi for CatalogClient {
    fn fetch_page(&mut self, offset: usize, limit: usize) -> Result<Vec<CanonicalExerciseRecord>> {
        let params = [
            ("select", self.config.select_clause()),
            ("order", format!("{}.asc", self.config.id_column)),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let rows = self.request_rows(&params)?;
        Ok(rows.into_iter().map(CatalogRow::into_record).collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: serde_json::Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

impl CatalogRow {
    fn into_record(self) -> CanonicalExerciseRecord {
        let id = match self.id {
            serde_json::Value::String(value) => value,
            other => other.to_string(),
        };
        CanonicalExerciseRecord::new(
            id,
            self.name.as_deref().unwrap_or_default(),
            self.display_name.as_deref(),
            self.media_url.as_deref(),
            self.thumbnail_url.as_deref(),
        )
    }
}

pub fn page_size_from_env() -> usize {
    env_value_usize("CATALOG_PAGE_SIZE", DEFAULT_PAGE_SIZE)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
