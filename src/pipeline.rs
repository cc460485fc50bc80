use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::{NormalizedRecord, RecordStore};
use crate::fetcher::PageSource;
use crate::images::ImageCache;
use crate::parser::{self, normalize::ParseContext};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::utils::format_duration;

/// Records gathered across pages for one run.
#[derive(Debug, Default)]
pub struct Harvest {
    pub records: Vec<NormalizedRecord>,
    pub pages_fetched: u32,
    /// False when a page fetch failed and later pages were never read.
    pub complete: bool,
}

/// Fetch and parse pages in order until a page adds nothing, the ceiling is
/// reached, or a fetch fails. Records come back in display order.
pub async fn collect_records(
    pages: &dyn PageSource,
    ctx: &ParseContext,
    ceiling: u32,
    delay: Duration,
) -> Harvest {
    let mut harvest = Harvest {
        complete: true,
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for page in 1..=ceiling {
        let html = match pages.fetch(page).await {
            Ok(html) => html,
            Err(e) => {
                warn!(
                    page,
                    error = %e,
                    kept = harvest.records.len(),
                    "Page fetch failed, keeping records collected so far"
                );
                harvest.complete = false;
                break;
            }
        };
        harvest.pages_fetched += 1;

        let parsed = parser::parse_page(&html, ctx);
        let total = parsed.len();
        let mut added = 0usize;
        for record in parsed {
            if seen.insert(record.external_id.clone()) {
                harvest.records.push(record);
                added += 1;
            } else {
                debug!(page, external_id = %record.external_id, "Duplicate animal, keeping first");
            }
        }
        info!(page, found = total, added, "Parsed listing page");

        if added == 0 {
            break;
        }
        if page < ceiling && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    sort_by_priority(&mut harvest.records);
    harvest
}

/// Shelter rank first, then the nearest deadline. Stable for ties.
pub fn sort_by_priority(records: &mut [NormalizedRecord]) {
    records.sort_by_key(|r| (r.shelter_priority_rank, r.days_until_deadline));
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub pages_fetched: u32,
    pub collected: usize,
    pub complete: bool,
    pub outcome: ReconcileOutcome,
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages{}, {} animals: {} added, {} updated, {} failed, {} deleted, {} fallback photos in {}",
            self.pages_fetched,
            if self.complete { "" } else { " (truncated)" },
            self.collected,
            self.outcome.inserted,
            self.outcome.updated,
            self.outcome.failed,
            self.outcome
                .deleted
                .map_or_else(|| "no sweep".to_string(), |n| n.to_string()),
            self.outcome.fallback_images,
            format_duration(self.elapsed),
        )
    }
}

/// Fetch → parse → reconcile, configured once at construction.
pub struct Pipeline {
    settings: Settings,
    pages: Arc<dyn PageSource>,
    reconciler: Reconciler,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        pages: Arc<dyn PageSource>,
        store: Arc<dyn RecordStore>,
        images: Arc<ImageCache>,
    ) -> Self {
        let reconciler = Reconciler::new(store, images, settings.image_concurrency);
        Self {
            settings,
            pages,
            reconciler,
        }
    }

    pub async fn run_once(&self) -> Result<RunReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let t0 = Instant::now();
        let ctx = ParseContext::new(&self.settings, now)?;
        info!(source = %self.settings.source_tag, "Scraping listing for urgent animals");

        let harvest = collect_records(
            self.pages.as_ref(),
            &ctx,
            self.settings.page_ceiling,
            self.settings.page_delay(),
        )
        .await;

        // A truncated harvest says nothing about what was removed. An empty
        // listing fetched cleanly does.
        let sweep = harvest.complete;
        let outcome = self
            .reconciler
            .reconcile(&self.settings.source_tag, &harvest.records, sweep, now)
            .await?;

        let report = RunReport {
            pages_fetched: harvest.pages_fetched,
            collected: harvest.records.len(),
            complete: harvest.complete,
            outcome,
            elapsed: t0.elapsed(),
        };
        info!(%report, "Run finished");
        Ok(report)
    }
}
