//! HTTP fetcher helper (feature `http`)
//!
//! Builds a [`crate::cache::Fetcher`] that downloads one agency file over
//! HTTP. Dataset-specific parsing stays with the per-source readers; this
//! only moves bytes.

use crate::cache::Fetcher;
use crate::error::DeflateError;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// A fetcher that downloads `url` and writes the body to the cache path.
/// Non-success statuses and transport failures surface as data-source
/// errors; a stuck server blocks until the client timeout.
pub fn http_fetcher(url: impl Into<String>) -> Fetcher {
    let url = url.into();
    Box::new(move |path| {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| {
                DeflateError::data_source("http", format!("failed to create HTTP client: {}", e))
            })?;
        let bytes = client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(|e| {
                DeflateError::data_source("http", format!("download failed for {}: {}", url, e))
            })?;
        std::fs::write(path, &bytes)?;
        Ok(())
    })
}
