//! Paginated Collection Fetcher
//!
//! Walks a `{data: [...], pages: {next_url}}` collection page by page. Pages
//! are requested strictly in cursor order: the next URL is only known once the
//! current page has been decoded.

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::fetch::{decode_json, expect_success, HttpClient};
use crate::sync::{SyncContext, SyncProgress};

// == Page Envelope ==
/// One page of a paginated collection.
///
/// `data` and `pages` are required; a body missing either is a parse error.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<R> {
    pub data: Vec<R>,
    pub pages: PageLinks,
    #[serde(default)]
    pub total_count: Option<u64>,
}

/// Cursor block of a page envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PageLinks {
    pub next_url: Option<String>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

// == Fetch All ==
/// Fetches every page starting at `first_url` and returns the records in
/// upstream order.
///
/// `build` turns a page URL into an authenticated request; it is called once
/// per page. An empty page ends the walk even if it carries a cursor, and a
/// cursor pointing back at the page just fetched is rejected as malformed.
pub async fn fetch_all<R, B>(
    http: &HttpClient,
    first_url: String,
    build: B,
    ctx: &SyncContext,
) -> Result<Vec<R>>
where
    R: DeserializeOwned,
    B: Fn(&str) -> RequestBuilder,
{
    let mut records: Vec<R> = Vec::new();
    let mut next = Some(first_url);
    let mut pages = 0usize;

    while let Some(url) = next.take() {
        ctx.check_cancelled()?;

        let request = build(&url).build()?;
        let response = http.fetch_with_retry(request, ctx).await?;
        let response = expect_success(response).await?;
        let page: Page<R> = decode_json(response).await?;
        pages += 1;

        let page_len = page.data.len();
        records.extend(page.data);
        ctx.report(SyncProgress::InProgress {
            fetched: records.len(),
            total: page.total_count,
        });
        debug!(
            "Fetched page {} ({} records, {} total so far)",
            pages,
            page_len,
            records.len()
        );

        if page_len == 0 {
            break;
        }

        next = match page.pages.next_url {
            Some(next_url) if next_url == url => {
                return Err(SyncError::Parse(format!(
                    "pagination cursor did not advance past {}",
                    url
                )));
            }
            other => other,
        };
    }

    Ok(records)
}
