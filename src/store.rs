//! Catalog REST client (PostgREST) with exponential backoff retry logic.
//!
//! The hosted catalog database is reached only through its REST API, plus the
//! object storage endpoint of the same host for uploading artifacts.
//!
//! # Architecture
//!
//! - [`CatalogStore`]: reading pages of rows and patching single rows
//! - [`ObjectStore`]: uploading a file to a storage bucket
//! - [`RestStore`]: both traits over `reqwest`
//! - [`RetryStore`]: decorator that adds retry logic to any [`CatalogStore`]
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//! - Only transient failures are retried (network errors, 429, 5xx)

use crate::models::{CatalogRow, RowPatch};
use rand::{Rng, rng};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Request, Response};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid catalog URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid API key header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

impl StoreError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            StoreError::Url(_) | StoreError::Header(_) => false,
        }
    }
}

/// Reading and updating catalog rows.
pub trait CatalogStore {
    /// Fetch up to `limit` rows starting at `offset`, ordered by id.
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<CatalogRow>, StoreError>;

    /// Apply `patch` to the row with the given id.
    async fn patch_row(&self, id: &str, patch: &RowPatch) -> Result<(), StoreError>;
}

/// Uploading artifacts (rollback files, reports) to object storage.
pub trait ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;
}

/// Fetch every row by paging until a short page comes back.
#[instrument(level = "info", skip_all, fields(page_size = page_size))]
pub async fn fetch_all<S: CatalogStore>(
    store: &S,
    page_size: usize,
) -> Result<Vec<CatalogRow>, StoreError> {
    let mut rows = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = store.fetch_page(offset, page_size).await?;
        let fetched = page.len();
        rows.extend(page);
        debug!(offset, fetched, "Fetched page");
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    info!(count = rows.len(), "Fetched all catalog rows");
    Ok(rows)
}

/// PostgREST + storage client for one catalog table.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base: Url,
    table: String,
    headers: HeaderMap,
}

impl fmt::Debug for RestStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestStore")
            .field("base", &self.base.as_str())
            .field("table", &self.table)
            .finish()
    }
}

impl RestStore {
    /// Build a client for `{base_url}/rest/v1/{table}`.
    ///
    /// The API key is sent both as `apikey` and as a bearer token.
    pub fn new(base_url: &str, api_key: &str, table: &str) -> Result<Self, StoreError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key)?;
        key.set_sensitive(true);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        bearer.set_sensitive(true);
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        Ok(Self {
            client: Client::new(),
            base,
            table: table.to_string(),
            headers,
        })
    }

    fn table_url(&self) -> Result<Url, StoreError> {
        Ok(self.base.join(&format!("rest/v1/{}", self.table))?)
    }

    fn page_url(&self, offset: usize, limit: usize) -> Result<Url, StoreError> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair(
                "select",
                "id,brand,product_name,form,url,image_url,ingredients,source,brand_slug,product_key",
            )
            .append_pair("order", "id.asc")
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    fn row_url(&self, id: &str) -> Result<Url, StoreError> {
        let mut url = self.table_url()?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        Ok(url)
    }

    fn object_url(&self, bucket: &str, path: &str) -> Result<Url, StoreError> {
        let encoded = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(self.base.join(&format!(
            "storage/v1/object/{}/{}",
            urlencoding::encode(bucket),
            encoded
        ))?)
    }

    fn page_request(&self, offset: usize, limit: usize) -> Result<Request, StoreError> {
        Ok(self
            .client
            .get(self.page_url(offset, limit)?)
            .headers(self.headers.clone())
            .build()?)
    }

    fn patch_request(&self, id: &str, patch: &RowPatch) -> Result<Request, StoreError> {
        Ok(self
            .client
            .patch(self.row_url(id)?)
            .headers(self.headers.clone())
            .header("Prefer", "return=minimal")
            .json(patch)
            .build()?)
    }

    fn upload_request(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Request, StoreError> {
        Ok(self
            .client
            .post(self.object_url(bucket, path)?)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .build()?)
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body: crate::utils::truncate_for_log(&body, 300),
    })
}

impl CatalogStore for RestStore {
    #[instrument(level = "info", skip_all, fields(table = %self.table, offset = offset, limit = limit))]
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<CatalogRow>, StoreError> {
        let t0 = Instant::now();
        let response = self.client.execute(self.page_request(offset, limit)?).await?;
        let rows: Vec<CatalogRow> = check_status(response).await?.json().await?;
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            count = rows.len(),
            "Fetched catalog page"
        );
        Ok(rows)
    }

    #[instrument(level = "info", skip_all, fields(table = %self.table, id = %id))]
    async fn patch_row(&self, id: &str, patch: &RowPatch) -> Result<(), StoreError> {
        let response = self.client.execute(self.patch_request(id, patch)?).await?;
        check_status(response).await?;
        Ok(())
    }
}

impl ObjectStore for RestStore {
    #[instrument(level = "info", skip_all, fields(bucket = %bucket, path = %path, bytes = bytes.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let request = self.upload_request(bucket, path, bytes, content_type)?;
        let response = self.client.execute(request).await?;
        check_status(response).await?;
        info!("Uploaded object");
        Ok(())
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`CatalogStore`].
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..max_jitter)
/// ```
pub struct RetryStore<T> {
    /// The underlying store to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
    /// Upper bound of the random jitter added to each delay.
    max_jitter: StdDuration,
}

impl<T> RetryStore<T> {
    /// Wrap `inner` with a 30s delay cap and up to 250ms of jitter.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = RestStore::new(url, key, "products")?;
    /// let store = RetryStore::new(store, 5, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            max_jitter: StdDuration::from_millis(250),
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: StdDuration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn delay_for(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=jitter_ms)
        };
        delay + StdDuration::from_millis(jitter)
    }

    async fn with_retry<O, F, Fut>(&self, op: &'static str, mut call: F) -> Result<O, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O, StoreError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match call().await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if !e.is_transient() {
                        error!(op, error = %e, "Permanent failure; not retrying");
                        return Err(e);
                    }
                    if attempt > self.max_retries {
                        error!(
                            op,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "Exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        op,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "Attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStore")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: CatalogStore> CatalogStore for RetryStore<T> {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<CatalogRow>, StoreError> {
        self.with_retry("fetch_page", || self.inner.fetch_page(offset, limit))
            .await
    }

    async fn patch_row(&self, id: &str, patch: &RowPatch) -> Result<(), StoreError> {
        self.with_retry("patch_row", || self.inner.patch_row(id, patch))
            .await
    }
}

impl<T: ObjectStore> ObjectStore for RetryStore<T> {
    async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.with_retry("put_object", || {
            self.inner.put_object(bucket, path, bytes.clone(), content_type)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory catalog used by store and job tests.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryStore {
        pub rows: Mutex<BTreeMap<String, CatalogRow>>,
        pub patches: Mutex<Vec<(String, RowPatch)>>,
        pub objects: Mutex<Vec<(String, String, Vec<u8>)>>,
        /// Ids whose patch fails with a permanent error.
        pub reject_ids: Vec<String>,
        /// Number of leading calls that fail with a 503.
        pub flaky_calls: Mutex<usize>,
        /// Every upload fails with a permanent error.
        pub fail_uploads: bool,
    }

    impl MemoryStore {
        pub(crate) fn with_rows(rows: Vec<CatalogRow>) -> Self {
            let store = Self::default();
            {
                let mut map = store.rows.lock().unwrap();
                for row in rows {
                    map.insert(row.id.clone(), row);
                }
            }
            store
        }

        fn maybe_flake(&self) -> Result<(), StoreError> {
            let mut flaky = self.flaky_calls.lock().unwrap();
            if *flaky > 0 {
                *flaky -= 1;
                return Err(StoreError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }

        pub(crate) fn row(&self, id: &str) -> CatalogRow {
            self.rows.lock().unwrap()[id].clone()
        }
    }

    impl CatalogStore for MemoryStore {
        async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<CatalogRow>, StoreError> {
            self.maybe_flake()?;
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn patch_row(&self, id: &str, patch: &RowPatch) -> Result<(), StoreError> {
            self.maybe_flake()?;
            if self.reject_ids.iter().any(|r| r == id) {
                return Err(StoreError::Status {
                    status: 400,
                    body: "rejected".to_string(),
                });
            }
            let mut rows = self.rows.lock().unwrap();
            let row = rows.get_mut(id).ok_or(StoreError::Status {
                status: 404,
                body: "missing".to_string(),
            })?;
            if let Some(v) = &patch.brand {
                row.brand = v.clone();
            }
            if let Some(v) = &patch.product_name {
                row.product_name = v.clone();
            }
            if let Some(v) = &patch.brand_slug {
                row.brand_slug = Some(v.clone());
            }
            if let Some(v) = &patch.product_key {
                row.product_key = Some(v.clone());
            }
            self.patches.lock().unwrap().push((id.to_string(), patch.clone()));
            Ok(())
        }
    }

    impl ObjectStore for MemoryStore {
        async fn put_object(
            &self,
            bucket: &str,
            path: &str,
            bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), StoreError> {
            if self.fail_uploads {
                return Err(StoreError::Status {
                    status: 403,
                    body: "bucket not writable".to_string(),
                });
            }
            self.objects
                .lock()
                .unwrap()
                .push((bucket.to_string(), path.to_string(), bytes));
            Ok(())
        }
    }

    fn rows(n: usize) -> Vec<CatalogRow> {
        (0..n)
            .map(|i| CatalogRow::new(&format!("{i:04}"), "Acana", "Classics"))
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_all_pages_until_short_page() {
        let store = MemoryStore::with_rows(rows(7));
        let all = fetch_all(&store, 3).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[0].id, "0000");
        assert_eq!(all[6].id, "0006");
    }

    #[tokio::test]
    async fn test_fetch_all_exact_multiple_ends_on_empty_page() {
        let store = MemoryStore::with_rows(rows(6));
        assert_eq!(fetch_all(&store, 3).await.unwrap().len(), 6);
        let empty = MemoryStore::default();
        assert!(fetch_all(&empty, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let inner = MemoryStore::with_rows(rows(2));
        *inner.flaky_calls.lock().unwrap() = 2;
        let store = RetryStore::new(inner, 5, StdDuration::ZERO).with_max_jitter(StdDuration::ZERO);
        let page = store.fetch_page(0, 10).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let inner = MemoryStore::with_rows(rows(2));
        *inner.flaky_calls.lock().unwrap() = 10;
        let store = RetryStore::new(inner, 2, StdDuration::ZERO).with_max_jitter(StdDuration::ZERO);
        let err = store.fetch_page(0, 10).await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
        // One initial call plus two retries.
        assert_eq!(*store.inner().flaky_calls.lock().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_permanent_errors() {
        let mut inner = MemoryStore::with_rows(rows(1));
        inner.reject_ids = vec!["0000".to_string()];
        let store = RetryStore::new(inner, 5, StdDuration::ZERO).with_max_jitter(StdDuration::ZERO);
        let err = store.patch_row("0000", &RowPatch::default()).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        let status = |status| StoreError::Status {
            status,
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(502).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn test_delay_is_capped() {
        let store = RetryStore::new((), 5, StdDuration::from_secs(1)).with_max_jitter(StdDuration::ZERO);
        assert_eq!(store.delay_for(1), StdDuration::from_secs(1));
        assert_eq!(store.delay_for(3), StdDuration::from_secs(4));
        assert_eq!(store.delay_for(10), StdDuration::from_secs(30));
    }

    #[test]
    fn test_rest_urls() {
        let store = RestStore::new("https://abc.supabase.co", "secret", "products").unwrap();
        assert_eq!(
            store.table_url().unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/products"
        );

        let page = store.page_url(200, 100).unwrap();
        let query: BTreeMap<_, _> = page.query_pairs().into_owned().collect();
        assert_eq!(query["order"], "id.asc");
        assert_eq!(query["offset"], "200");
        assert_eq!(query["limit"], "100");
        assert!(query["select"].starts_with("id,brand,product_name"));

        assert_eq!(
            store.row_url("42").unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/products?id=eq.42"
        );
        assert_eq!(
            store.object_url("exports", "rollbacks/run 1.json").unwrap().as_str(),
            "https://abc.supabase.co/storage/v1/object/exports/rollbacks/run%201.json"
        );
    }

    fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_every_request_carries_the_api_key() {
        let store = RestStore::new("https://abc.supabase.co", "secret", "products").unwrap();
        let requests = [
            store.page_request(0, 10).unwrap(),
            store.patch_request("42", &RowPatch::default()).unwrap(),
            store
                .upload_request("exports", "a.json", b"{}".to_vec(), "application/json")
                .unwrap(),
        ];
        for request in &requests {
            assert_eq!(header(request, "apikey"), Some("secret"));
            assert_eq!(header(request, "authorization"), Some("Bearer secret"));
        }
        assert_eq!(requests[0].method(), reqwest::Method::GET);
        assert_eq!(header(&requests[0], "prefer"), None);
    }

    #[test]
    fn test_patch_request_shape() {
        let store = RestStore::new("https://abc.supabase.co", "secret", "products").unwrap();
        let patch = RowPatch {
            brand: Some("Royal Canin".to_string()),
            brand_slug: Some("royal-canin".to_string()),
            ..RowPatch::default()
        };
        let request = store.patch_request("42", &patch).unwrap();

        assert_eq!(request.method(), reqwest::Method::PATCH);
        assert_eq!(
            request.url().as_str(),
            "https://abc.supabase.co/rest/v1/products?id=eq.42"
        );
        assert_eq!(header(&request, "prefer"), Some("return=minimal"));
        assert_eq!(header(&request, "content-type"), Some("application/json"));

        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "brand": "Royal Canin", "brand_slug": "royal-canin" })
        );
    }

    #[test]
    fn test_upload_request_shape() {
        let store = RestStore::new("https://abc.supabase.co", "secret", "products").unwrap();
        let request = store
            .upload_request("exports", "rollbacks/r.json", b"[1]".to_vec(), "application/json")
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://abc.supabase.co/storage/v1/object/exports/rollbacks/r.json"
        );
        assert_eq!(header(&request, "x-upsert"), Some("true"));
        assert_eq!(header(&request, "content-type"), Some("application/json"));
        assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&b"[1]"[..]));
    }

    #[test]
    fn test_rest_store_keeps_base_path() {
        let store = RestStore::new("http://localhost:54321/proxy", "k", "products").unwrap();
        assert_eq!(
            store.table_url().unwrap().as_str(),
            "http://localhost:54321/proxy/rest/v1/products"
        );
    }

    #[test]
    fn test_debug_hides_api_key() {
        let store = RestStore::new("https://abc.supabase.co", "super-secret", "products").unwrap();
        assert!(!format!("{store:?}").contains("super-secret"));
    }
}
