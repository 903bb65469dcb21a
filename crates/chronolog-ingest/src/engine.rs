//! The ingestion engine.
//!
//! Drives a [`FeedSource`] through pagination, deduplication, time-window
//! grouping and persistence. One feed's `update` is a self-contained unit of
//! work: any failure inside it is caught at that boundary, logged, and
//! reported as zero events added, so a broken feed can never halt the
//! ingestion of others.

use crate::enrich::Enricher;
use crate::error::{Error, Result};
use crate::source::{FeedSource, FetchContext, FetchRequest, StatusAction};
use chronolog_core::{Event, Field};
use chronolog_store::Store;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Drives one request at a time through a source's pagination.
///
/// Page N+1 is never requested before page N has been consumed, since the
/// next request is only known after parsing the current response. A retry
/// signalled by the source's status hook repeats the *same* request without
/// yielding events; two consecutive retry signals are fatal.
pub struct Paginator<'a> {
    source: &'a dyn FeedSource,
    client: &'a reqwest::Client,
    next: Option<FetchRequest>,
    all: bool,
    rate_limit: bool,
    started: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        source: &'a dyn FeedSource,
        client: &'a reqwest::Client,
        initial: FetchRequest,
        ctx: &FetchContext,
    ) -> Self {
        if ctx.rate_limit {
            info!(
                "rate limiting requests to {:.0} second(s) per req",
                1.0 / source.rate_limit()
            );
        }

        Self {
            source,
            client,
            next: Some(initial),
            all: ctx.all,
            rate_limit: ctx.rate_limit,
            started: false,
        }
    }

    async fn send(&self, request: &FetchRequest) -> Result<(StatusCode, Vec<u8>)> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        Ok((status, body))
    }

    /// Fetch and parse the next page, or `None` when exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Event>>> {
        let Some(mut request) = self.next.take() else {
            return Ok(None);
        };

        // Cooperative pacing between pages, never before the first.
        if self.started && self.rate_limit && self.source.rate_limit() > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(
                1.0 / self.source.rate_limit(),
            ))
            .await;
        }
        self.started = true;

        let mut retried = false;

        loop {
            debug!(url = %request.url, "making request");
            let (status, body) = self.send(&request).await?;

            match self.source.parse_status(status, &body, &request)? {
                StatusAction::Retry { url, headers } => {
                    if retried {
                        return Err(Error::RetryLoop { url: request.url });
                    }
                    retried = true;

                    if let Some(url) = url {
                        request.url = url;
                    }
                    if let Some(headers) = headers {
                        request.headers = headers;
                    }

                    warn!(url = %request.url, "retrying request");
                }
                StatusAction::Proceed => {
                    let data: serde_json::Value = serde_json::from_slice(&body)?;
                    let outcome = self.source.parse(&data)?;

                    self.next = outcome.next;

                    // Non-time-keyed feeds cannot be trusted to paginate in a
                    // way that supports incremental early-stop; consult only
                    // one page unless everything was explicitly requested.
                    if self.source.key_field() != Field::Occurred && !self.all {
                        self.next = None;
                    }

                    return Ok(Some(outcome.events));
                }
            }
        }
    }
}

/// Cluster near-simultaneous events into one-level parent/child groups.
///
/// No-op unless the source declares grouping. Events are walked in
/// ascending `occurred` order with a running group leader (seeded from the
/// store's latest event when present). An event within `grouped_window`
/// seconds of the leader's deepest related timestamp AND on the same
/// calendar day attaches as a child; otherwise it starts a new group. A
/// pair inside the window that straddles midnight does not group.
pub fn group(source: &dyn FeedSource, events: Vec<Event>, latest: Option<Event>) -> Vec<Event> {
    if !source.grouped() {
        return events;
    }

    let window = source.grouped_window();

    let mut sorted = events;
    sorted.sort_by(|a, b| a.occurred.cmp(&b.occurred).then_with(|| a.id.cmp(&b.id)));

    let mut grouped: Vec<Event> = Vec::new();

    // A leader seeded from the store is only re-emitted when it gains
    // children this run; a leader from the input batch is always emitted.
    let mut leader: Option<Event> = latest;
    let mut emit_leader = false;

    for event in sorted {
        let attach = match &leader {
            Some(current) => {
                let anchor = current.latest_occurred();
                let delta = event.occurred.signed_duration_since(anchor).num_seconds();
                (0..window).contains(&delta)
                    && event.occurred.date_naive() == anchor.date_naive()
            }
            None => false,
        };

        if attach {
            if let Some(current) = leader.as_mut() {
                debug!(event = %event.id, "grouped event");
                current.add_related(event);
                emit_leader = true;
            }
        } else {
            if emit_leader {
                grouped.extend(leader.replace(event));
            } else {
                leader = Some(event);
            }
            emit_leader = true;
        }
    }

    if emit_leader {
        grouped.extend(leader);
    }

    grouped
}

/// Orchestrates fetch, dedup, enrichment, grouping and persistence across
/// feeds. One independent task per feed; no shared mutable state between
/// feeds beyond the store and its index.
#[derive(Clone)]
pub struct IngestionEngine {
    store: Arc<Store>,
    client: reqwest::Client,
    enrichers: Vec<Arc<dyn Enricher>>,
}

impl IngestionEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            enrichers: Vec::new(),
        }
    }

    /// Register a media enrichment collaborator.
    pub fn add_enricher(&mut self, enricher: Arc<dyn Enricher>) {
        self.enrichers.push(enricher);
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Consume the source's pagination, applying the dedup policy selected
    /// by its key field.
    ///
    /// Time-keyed feeds emit in descending `occurred` order: keep events
    /// strictly newer than `last_updated` and stop consuming pages at the
    /// first non-newer one. Other feeds stop at the last known key value
    /// and otherwise keep only events whose key is absent from the store.
    pub async fn fetch(&self, source: &dyn FeedSource, ctx: &FetchContext) -> Result<Vec<Event>> {
        let initial = source.init_params(ctx)?;
        let mut pages = Paginator::new(source, &self.client, initial, ctx);

        let key_field = source.key_field();
        let mut kept = Vec::new();

        'pages: while let Some(events) = pages.next_page().await? {
            for event in events {
                if key_field == Field::Occurred {
                    match ctx.last_updated {
                        Some(bound) if event.occurred <= bound => {
                            debug!(event = %event, "event is old, stopping");
                            break 'pages;
                        }
                        _ => kept.push(event),
                    }
                } else {
                    let Some(key) = key_field.value_of(&event) else {
                        // No key value to dedup on; keep it.
                        kept.push(event);
                        continue;
                    };

                    if ctx.last_key.as_deref() == Some(key.as_str()) {
                        debug!(
                            field = %key_field,
                            value = %key,
                            "matched last known value, stopping"
                        );
                        break 'pages;
                    }

                    if self.store.exists(key_field, &key)? {
                        debug!(event = %event, "already exists, ignoring");
                    } else {
                        kept.push(event);
                    }
                }
            }
        }

        Ok(kept)
    }

    async fn update_inner(&self, source: &dyn FeedSource, dry: bool) -> Result<usize> {
        let feed = &source.info().short_name;

        // Lower bound for the incremental fetch.
        let latest = self.store.get_latest_event(feed)?;
        let last_updated = latest.as_ref().map(|event| event.latest_occurred());

        match last_updated {
            Some(last_updated) => debug!(%last_updated, "last updated"),
            None => debug!("no previous entries"),
        }

        let ctx = FetchContext {
            last_updated,
            ..Default::default()
        };

        let mut events = self.fetch(source, &ctx).await?;
        let added = events.len();

        for event in &mut events {
            for enricher in &self.enrichers {
                if let Err(err) = enricher.enrich(event, dry) {
                    warn!(
                        event = %event.id,
                        enricher = enricher.name(),
                        error = %err,
                        "enrichment failed"
                    );
                }
            }
        }

        let events = group(source, events, latest);

        self.store.add_events(&events, dry)?;

        Ok(added)
    }

    /// Run one feed's ingestion cycle. Returns the number of events added;
    /// any failure is logged and reported as zero, never propagated.
    pub async fn update(&self, source: &dyn FeedSource, dry: bool) -> usize {
        let start = Instant::now();
        let feed = source.info().short_name.clone();

        let added = match self.update_inner(source, dry).await {
            Ok(added) => {
                if added > 0 {
                    info!(feed, added, "events added");
                }
                added
            }
            Err(err) => {
                error!(feed, error = %err, "unable to process feed");
                0
            }
        };

        debug!(feed, elapsed = ?start.elapsed(), "processing finished");

        added
    }

    /// Update every feed concurrently, one task per feed, failures
    /// isolated. Returns per-feed added counts.
    pub async fn update_all(
        &self,
        sources: Vec<Arc<dyn FeedSource>>,
        dry: bool,
    ) -> Vec<(String, usize)> {
        let mut tasks = JoinSet::new();

        for source in sources {
            let engine = self.clone();
            tasks.spawn(async move {
                let feed = source.info().short_name.clone();
                let added = engine.update(source.as_ref(), dry).await;
                (feed, added)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(error = %err, "feed update task failed"),
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ParseOutcome;
    use chrono::{TimeZone, Utc};
    use chronolog_core::FeedInfo;

    struct GroupedSource {
        info: FeedInfo,
        grouped: bool,
        window: i64,
    }

    impl FeedSource for GroupedSource {
        fn info(&self) -> &FeedInfo {
            &self.info
        }

        fn grouped(&self) -> bool {
            self.grouped
        }

        fn grouped_window(&self) -> i64 {
            self.window
        }

        fn init_params(&self, _ctx: &FetchContext) -> Result<FetchRequest> {
            Ok(FetchRequest::new("https://example.com/feed"))
        }

        fn parse(&self, _body: &serde_json::Value) -> Result<ParseOutcome> {
            Ok(ParseOutcome {
                events: Vec::new(),
                next: None,
            })
        }

        fn to_event(&self, _raw: serde_json::Value) -> Result<Event> {
            Ok(Event::new(Utc::now()))
        }
    }

    fn grouped_source(window: i64) -> GroupedSource {
        GroupedSource {
            info: FeedInfo {
                id: "feed-1".to_string(),
                short_name: "grouped".to_string(),
                full_name: "Grouped".to_string(),
                color: "000000".to_string(),
                favicon: None,
            },
            grouped: true,
            window,
        }
    }

    fn event_at(secs: i64) -> Event {
        Event::new(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_group_is_noop_for_ungrouped_sources() {
        let mut source = grouped_source(3600);
        source.grouped = false;

        let events = vec![event_at(1_000), event_at(1_060)];
        let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();

        let out = group(&source, events, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, ids[0]);
        assert!(out.iter().all(|e| e.related.is_none()));
    }

    #[test]
    fn test_two_events_within_window_form_one_cluster() {
        let source = grouped_source(3600);

        // Three minutes apart on the same day.
        let events = vec![event_at(1_700_000_000), event_at(1_700_000_180)];
        let out = group(&source, events, None);

        assert_eq!(out.len(), 1);
        let children = out[0].related.as_ref().unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn test_window_anchors_on_deepest_child() {
        let source = grouped_source(120);

        // Each event is 90s after the previous; every delta is measured
        // against the last attached child, so they chain into one cluster.
        let base = 1_700_000_000;
        let events = vec![
            event_at(base),
            event_at(base + 90),
            event_at(base + 180),
            event_at(base + 270),
        ];

        let out = group(&source, events, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].related.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_events_outside_window_start_new_groups() {
        let source = grouped_source(60);

        let base = 1_700_000_000;
        let events = vec![event_at(base), event_at(base + 30), event_at(base + 300)];

        let out = group(&source, events, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].related.as_ref().unwrap().len(), 1);
        assert!(out[1].related.is_none());
    }

    #[test]
    fn test_grouping_is_deterministic_and_one_level_deep() {
        let source = grouped_source(3600);
        let base = 1_700_000_000;

        let make = || {
            vec![
                event_at(base + 120),
                event_at(base),
                event_at(base + 240),
                event_at(base + 9_000),
            ]
        };

        let first = group(&source, make(), None);
        let second = group(&source, make(), None);

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(
                a.related.as_ref().map(|r| r.len()),
                b.related.as_ref().map(|r| r.len())
            );
            if let Some(children) = &a.related {
                assert!(children.iter().all(|c| c.related.is_none()));
            }
        }
    }

    #[test]
    fn test_midnight_straddle_does_not_group() {
        let source = grouped_source(3600);

        // 23:59:00 and 00:01:00 the next day: 120s apart, inside the
        // window, but on different calendar days. Documented boundary
        // behavior: they do not group.
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 2, 0, 1, 0).unwrap();

        let out = group(
            &source,
            vec![Event::new(before), Event::new(after)],
            None,
        );

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| e.related.is_none()));
    }

    #[test]
    fn test_store_leader_reemitted_only_when_dirty() {
        let source = grouped_source(3600);
        let base = 1_700_000_000;

        // Leader from the store picks up a new child within the window.
        let stored = event_at(base);
        let stored_id = stored.id.clone();
        let out = group(&source, vec![event_at(base + 60)], Some(stored));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, stored_id);
        assert_eq!(out[0].related.as_ref().unwrap().len(), 1);

        // Outside the window the stored leader stays untouched and is not
        // re-persisted.
        let stored = event_at(base);
        let out = group(&source, vec![event_at(base + 9_000)], Some(stored));

        assert_eq!(out.len(), 1);
        assert!(out[0].related.is_none());
    }

    #[test]
    fn test_store_leader_window_anchors_on_its_children() {
        let source = grouped_source(120);
        let base = 1_700_000_000;

        // The stored leader already has a child at base+600; a new event
        // 60s after that child attaches even though it is far from the
        // leader's own timestamp.
        let mut stored = event_at(base);
        stored.add_related(event_at(base + 600));

        let out = group(&source, vec![event_at(base + 660)], Some(stored));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].related.as_ref().unwrap().len(), 2);
    }
}
