use anyhow::{Context, Result};
use licita_core::{Row, Watermark};
use licita_feed::{entry_updated, extract_row, parse_page, FieldSpec, Namespaces, FIELD_TABLE};
use licita_storage::PageSource;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A fetched page held no entries.
    Exhausted,
    /// An entry at or below the watermark was met.
    ReachedWatermark,
    /// The last page had no `rel="next"` link.
    NoNextLink,
    /// The per-run page budget was spent.
    PageLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkResult {
    pub rows: Vec<Row>,
    pub pages_fetched: usize,
    pub stop_reason: StopReason,
    pub defaulted_fields: usize,
}

/// Drives fetch, parse, filter and follow-next over a newest-first feed.
///
/// The walker never persists anything; it hands back the rows newer than the
/// watermark it was given.
pub struct Walker<'a> {
    source: &'a dyn PageSource,
    namespaces: Namespaces,
    table: &'a [FieldSpec],
    max_pages: usize,
}

impl<'a> Walker<'a> {
    pub fn new(source: &'a dyn PageSource, max_pages: usize) -> Self {
        Self {
            source,
            namespaces: Namespaces::well_known(),
            table: FIELD_TABLE,
            max_pages,
        }
    }

    pub fn with_field_table(mut self, table: &'a [FieldSpec]) -> Self {
        self.table = table;
        self
    }

    pub async fn walk(&self, root_url: &str, watermark: Watermark) -> Result<WalkResult> {
        let mut rows = Vec::new();
        let mut pages_fetched = 0usize;
        let mut defaulted_fields = 0usize;
        let mut url = root_url.to_string();

        if self.max_pages == 0 {
            return Ok(WalkResult {
                rows,
                pages_fetched,
                stop_reason: StopReason::PageLimit,
                defaulted_fields,
            });
        }

        let stop_reason = loop {
            pages_fetched += 1;
            let body = self
                .source
                .fetch(&url)
                .await
                .with_context(|| format!("fetching feed page {url}"))?;
            let page = parse_page(&body, &self.namespaces)
                .with_context(|| format!("parsing feed page {url}"))?;
            info!(
                page = pages_fetched,
                url = %url,
                entries = page.entries.len(),
                "fetched feed page"
            );

            if page.entries.is_empty() {
                break StopReason::Exhausted;
            }

            let mut reached_watermark = false;
            for entry in &page.entries {
                let updated = entry_updated(entry, &page.namespaces)
                    .with_context(|| format!("reading entry timestamp on {url}"))?;
                if watermark.covers(updated) {
                    reached_watermark = true;
                    break;
                }
                let extracted = extract_row(entry, &page.namespaces, self.table)
                    .with_context(|| format!("extracting entry on {url}"))?;
                defaulted_fields += extracted.defaulted.len();
                rows.push(extracted.row);
            }
            if reached_watermark {
                break StopReason::ReachedWatermark;
            }

            let Some(next) = page.next_url else {
                break StopReason::NoNextLink;
            };
            if pages_fetched >= self.max_pages {
                break StopReason::PageLimit;
            }
            url = resolve_next(&url, &next)?;
        };

        info!(
            pages = pages_fetched,
            rows = rows.len(),
            stop = ?stop_reason,
            "feed walk finished"
        );
        Ok(WalkResult {
            rows,
            pages_fetched,
            stop_reason,
            defaulted_fields,
        })
    }
}

fn resolve_next(current: &str, next: &str) -> Result<String> {
    match reqwest::Url::parse(current) {
        Ok(base) => base
            .join(next)
            .map(String::from)
            .with_context(|| format!("resolving next link {next:?} against {current}")),
        Err(_) => Ok(next.to_string()),
    }
}
