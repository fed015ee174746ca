//! Fetch Module
//!
//! HTTP plumbing shared by every platform: rate-limit retry, status mapping,
//! strict JSON decoding and cursor pagination.

mod paginate;
mod retry;

pub use paginate::{fetch_all, Page, PageLinks};
pub use retry::{decode_json, expect_success, HttpClient, RateLimitPolicy};
