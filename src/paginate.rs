// Pagination: walk every page of a `{count, results}` endpoint and collect
// the records into one ordered sequence.

use indicatif::ProgressBar;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::Fetch;
use crate::error::{Error, Result};
use crate::query::Query;

/// Fixed page size of the OTX list endpoints.
pub const PAGE_SIZE: u64 = 1000;

/// Number of pages needed for `count` results, rounding up.
pub fn total_pages(count: u64) -> u64 {
    count.div_ceil(PAGE_SIZE)
}

/// Shape of a paginated response body.
#[derive(Debug, Deserialize)]
struct Page {
    count: Option<u64>,
    results: Option<Vec<Value>>,
}

/// Result of fetching one page after the first.
#[derive(Debug)]
pub enum PageOutcome {
    Fetched(Vec<Value>),
    Failed { page: u64, reason: String },
}

/// Every record returned for a query, in retrieval order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResult {
    pub records: Vec<Value>,
    /// Pages that could not be fetched and are missing from `records`.
    pub skipped_pages: Vec<u64>,
}

impl AggregatedResult {
    /// A single response body treated as the whole result.
    pub fn single(body: Value) -> Self {
        AggregatedResult {
            records: vec![body],
            skipped_pages: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped_pages.is_empty()
    }

    /// The records as one JSON array.
    pub fn to_json(&self) -> Value {
        Value::Array(self.records.clone())
    }
}

/// Run `query` to completion.
///
/// Single-indicator and CVE lookups issue one request and return its
/// body. List endpoints fetch the base page, then pages `total..=2` in
/// descending order. A failure on the base page aborts; a failure on a
/// later page is logged and that page is left out.
pub fn aggregate(fetcher: &dyn Fetch, query: &Query, progress: &ProgressBar) -> Result<AggregatedResult> {
    let first = fetcher.get(&query.path())?;

    if !query.is_paginated() {
        return Ok(AggregatedResult::single(first.body));
    }

    let page: Page = match serde_json::from_value(first.body.clone()) {
        Ok(page @ Page { count: Some(_), .. }) => page,
        _ => {
            warn!(status = first.status, "response has no result count; returning it unpaginated");
            return Ok(AggregatedResult::single(first.body));
        }
    };

    let count = page.count.unwrap_or_default();
    let pages = total_pages(count);
    debug!(count, pages, "paginating");

    let mut result = AggregatedResult::default();
    result.records.extend(page.results.unwrap_or_default());

    progress.set_length(pages.saturating_sub(1));
    for n in (2..=pages).rev() {
        match fetch_page(fetcher, query, n) {
            PageOutcome::Fetched(records) => result.records.extend(records),
            PageOutcome::Failed { page, reason } => {
                warn!(page, "skipping page: {reason}");
                result.skipped_pages.push(page);
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    if result.is_partial() {
        warn!(
            skipped = ?result.skipped_pages,
            "{} of {pages} pages could not be fetched; result is incomplete",
            result.skipped_pages.len()
        );
    }
    Ok(result)
}

/// Fetch page `n` (`n >= 2`) and pull out its records.
pub fn fetch_page(fetcher: &dyn Fetch, query: &Query, n: u64) -> PageOutcome {
    let failed = |reason: String| PageOutcome::Failed { page: n, reason };
    let response = match fetcher.get(&query.page_path(n)) {
        Ok(response) => response,
        Err(err) => return failed(err.to_string()),
    };
    match serde_json::from_value::<Page>(response.body) {
        Ok(Page {
            results: Some(records), ..
        }) => PageOutcome::Fetched(records),
        Ok(_) => failed(format!("status {} body has no results", response.status)),
        Err(err) => failed(Error::from(err).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Response;
    use crate::query::{ExportKind, IndicatorFamily, Section};
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Canned responses keyed by request path; unknown paths fail.
    #[derive(Default)]
    struct FakeApi {
        pages: HashMap<String, Value>,
        requested: RefCell<Vec<String>>,
    }

    impl FakeApi {
        fn with(mut self, path: String, body: Value) -> Self {
            self.pages.insert(path, body);
            self
        }
    }

    impl Fetch for FakeApi {
        fn get(&self, path: &str) -> Result<Response> {
            self.requested.borrow_mut().push(path.to_string());
            match self.pages.get(path) {
                Some(body) => Ok(Response {
                    status: 200,
                    body: body.clone(),
                }),
                None => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ))),
            }
        }
    }

    fn page(count: u64, ids: &[&str]) -> Value {
        let results: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        json!({ "count": count, "results": results })
    }

    fn ids(result: &AggregatedResult) -> Vec<&str> {
        result.records.iter().map(|r| r["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(total_pages(0), 0);
        assert_eq!(total_pages(1), 1);
        assert_eq!(total_pages(999), 1);
        assert_eq!(total_pages(1000), 1);
        assert_eq!(total_pages(1001), 2);
        assert_eq!(total_pages(3000), 3);
        assert_eq!(total_pages(3001), 4);
    }

    #[test]
    fn later_pages_are_walked_in_descending_order() {
        let q = Query::FreeTextSearch("apt".into());
        let api = FakeApi::default()
            .with(q.path(), page(2500, &["p1a", "p1b"]))
            .with(q.page_path(2), page(2500, &["p2a"]))
            .with(q.page_path(3), page(2500, &["p3a", "p3b"]));

        let result = aggregate(&api, &q, &ProgressBar::hidden()).unwrap();

        assert_eq!(ids(&result), ["p1a", "p1b", "p3a", "p3b", "p2a"]);
        assert!(!result.is_partial());
        assert_eq!(
            *api.requested.borrow(),
            [q.path(), q.page_path(3), q.page_path(2)]
        );
    }

    #[test]
    fn failed_middle_page_is_skipped() {
        let q = Query::PulseById("abc".into());
        let api = FakeApi::default()
            .with(q.path(), page(2001, &["p1"]))
            .with(q.page_path(3), page(2001, &["p3"]));

        let result = aggregate(&api, &q, &ProgressBar::hidden()).unwrap();

        assert_eq!(ids(&result), ["p1", "p3"]);
        assert_eq!(result.skipped_pages, [2]);
    }

    #[test]
    fn failed_first_page_is_fatal() {
        let q = Query::Export(ExportKind::Yara);
        let api = FakeApi::default().with(q.page_path(2), page(1500, &["p2"]));

        assert!(aggregate(&api, &q, &ProgressBar::hidden()).is_err());
        assert_eq!(api.requested.borrow().len(), 1);
    }

    #[test]
    fn exact_multiple_adds_no_extra_page() {
        let q = Query::FreeTextSearch("x".into());
        let api = FakeApi::default().with(q.path(), page(1000, &["only"]));

        let result = aggregate(&api, &q, &ProgressBar::hidden()).unwrap();

        assert_eq!(ids(&result), ["only"]);
        assert_eq!(api.requested.borrow().len(), 1);
    }

    #[test]
    fn zero_count_fetches_only_base_page() {
        let q = Query::FreeTextSearch("nothing".into());
        let api = FakeApi::default().with(q.path(), page(0, &[]));

        let result = aggregate(&api, &q, &ProgressBar::hidden()).unwrap();

        assert!(result.records.is_empty());
        assert_eq!(api.requested.borrow().len(), 1);
    }

    #[test]
    fn single_indicator_skips_pagination() {
        let q = Query::IndicatorLookup {
            family: IndicatorFamily::Ipv4,
            indicator: "8.8.8.8".into(),
            section: Section::General,
        };
        let body = json!({ "indicator": "8.8.8.8", "count": 5000 });
        let api = FakeApi::default().with(q.path(), body.clone());

        let result = aggregate(&api, &q, &ProgressBar::hidden()).unwrap();

        assert_eq!(result.records, vec![body]);
        assert_eq!(api.requested.borrow().len(), 1);
    }

    #[test]
    fn missing_count_returns_body_as_is() {
        let q = Query::PulseById("bad".into());
        let body = json!({ "detail": "Authentication credentials were not provided." });
        let api = FakeApi::default().with(q.path(), body.clone());

        let result = aggregate(&api, &q, &ProgressBar::hidden()).unwrap();

        assert_eq!(result, AggregatedResult::single(body));
    }

    #[test]
    fn page_without_results_is_a_failure() {
        let q = Query::FreeTextSearch("x".into());
        let api = FakeApi::default().with(q.page_path(2), json!({ "detail": "throttled" }));

        match fetch_page(&api, &q, 2) {
            PageOutcome::Failed { page, reason } => {
                assert_eq!(page, 2);
                assert!(reason.contains("no results"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
