//! The store facade.
//!
//! [`Store`] composes the connection pool, event query templates, search
//! index and result sets into the public retrieval/mutation API. Every
//! mutation accepts a `dry` flag that runs the full logic and validation
//! while discarding all durable side effects, on both the relational store
//! and the search index.

use crate::error::{Error, Result};
use crate::eventquery::EventQuery;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::query::QueryBuilder;
use crate::resultset::{QueryResultSet, ResultSet, SearchResultSet};
use crate::schema::SCHEMA;
use crate::search::{SearchConstraints, SearchIndex};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use chronolog_core::{Event, FeedConfig, FeedFlags, FeedInfo, Field};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Store location and sizing.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path.
    pub db_path: PathBuf,
    /// Search index directory; `None` disables indexing.
    pub index_dir: Option<PathBuf>,
    /// Pool reconnect-retry budget.
    pub min_conns: usize,
    /// Pool size.
    pub max_conns: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/chronolog.db"),
            index_dir: None,
            min_conns: 2,
            max_conns: 8,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `CHRONOLOG_DB_PATH`: database file (default: "./data/chronolog.db")
    /// - `CHRONOLOG_INDEX_DIR`: search index directory (default: disabled)
    /// - `CHRONOLOG_POOL_MIN` / `CHRONOLOG_POOL_MAX`: pool sizing
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let db_path = std::env::var("CHRONOLOG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let index_dir = std::env::var("CHRONOLOG_INDEX_DIR").ok().map(PathBuf::from);

        let min_conns = match std::env::var("CHRONOLOG_POOL_MIN") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.min_conns,
        };

        let max_conns = match std::env::var("CHRONOLOG_POOL_MAX") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.max_conns,
        };

        tracing::info!(
            db = %db_path.display(),
            index = ?index_dir,
            "store configuration loaded"
        );

        Ok(Self {
            db_path,
            index_dir,
            min_conns,
            max_conns,
        })
    }
}

/// Flag filters for [`Store::get_feeds`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedFilter {
    pub is_public: Option<bool>,
    pub is_updating: Option<bool>,
    pub is_searchable: Option<bool>,
}

/// Parameters for time-range retrieval.
#[derive(Debug, Clone)]
pub struct TimeRangeQuery {
    /// Exclusive lower bound.
    pub after: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub before: Option<DateTime<Utc>>,
    /// Restrict to these feed short names.
    pub feeds: Option<Vec<String>>,
    pub pagesize: usize,
    pub embed_related: bool,
    /// Include related children as top-level rows (implies no embedding).
    pub flattened: bool,
    pub timezone: Option<Tz>,
}

impl Default for TimeRangeQuery {
    fn default() -> Self {
        Self {
            after: None,
            before: None,
            feeds: None,
            pagesize: 10,
            embed_related: true,
            flattened: false,
            timezone: None,
        }
    }
}

/// Parameters for search retrieval.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Restrict hits to these feeds.
    pub to_filter: Option<Vec<String>>,
    /// Exclude hits from these feeds.
    pub to_mask: Option<Vec<String>>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub pagesize: usize,
    pub timezone: Option<Tz>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            to_filter: None,
            to_mask: None,
            after: None,
            before: None,
            pagesize: 10,
            timezone: None,
        }
    }
}

const INSERT_EVENT: &str = "insert into events \
     (id, feed_id, title, text, link, occurred, raw, thumbnail, original, archived, is_related) \
     values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
     on conflict (id) do nothing";

const UPSERT_CHILD: &str = "insert into events \
     (id, feed_id, title, text, link, occurred, raw, thumbnail, original, archived, is_related) \
     values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
     on conflict (id) do update set is_related = excluded.is_related";

fn json_value<T: serde::Serialize>(value: &Option<T>) -> Result<Value> {
    match value {
        Some(value) => Ok(Value::Text(serde_json::to_string(value)?)),
        None => Ok(Value::Null),
    }
}

fn text_value(value: &Option<String>) -> Value {
    match value {
        Some(value) => Value::Text(value.clone()),
        None => Value::Null,
    }
}

fn event_params(event: &Event, feed_id: &str, is_related: bool) -> Result<Vec<Value>> {
    Ok(vec![
        Value::Text(event.id.clone()),
        Value::Text(feed_id.to_string()),
        text_value(&event.title),
        text_value(&event.text),
        text_value(&event.link),
        Value::Integer(event.occurred.timestamp_micros()),
        json_value(&event.raw)?,
        json_value(&event.thumbnail)?,
        json_value(&event.original)?,
        json_value(&event.archived)?,
        Value::Integer(is_related as i64),
    ])
}

fn insert_event_tree(tx: &Transaction<'_>, event: &Event) -> Result<()> {
    let feed_id = event
        .feed
        .as_ref()
        .map(|feed| feed.id.clone())
        .ok_or_else(|| Error::MissingFeed(event.id.clone()))?;

    let inserted = tx.execute(
        INSERT_EVENT,
        params_from_iter(event_params(event, &feed_id, false)?),
    )?;

    if inserted == 0 {
        warn!(event = %event.id, "skipping existing event");
    }

    if let Some(children) = &event.related {
        for child in children {
            // Children read back from the store carry no feed of their own;
            // they always belong to the parent's feed.
            let child_feed = child
                .feed
                .as_ref()
                .map(|feed| feed.id.clone())
                .unwrap_or_else(|| feed_id.clone());

            tx.execute(
                UPSERT_CHILD,
                params_from_iter(event_params(child, &child_feed, true)?),
            )?;

            tx.execute(
                "insert into related_events (parent, child) values (?, ?) \
                 on conflict do nothing",
                [&event.id, &child.id],
            )?;
        }
    }

    debug!(event = %event.id, "saved event");
    Ok(())
}

/// Facade over the pool, event queries, search index and result sets.
pub struct Store {
    pool: Arc<ConnectionPool>,
    index: Arc<SearchIndex>,
}

impl Store {
    /// Open the store, bootstrapping the schema and the search index.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let pool = ConnectionPool::open(PoolConfig {
            path: config.db_path.clone(),
            min_conns: config.min_conns,
            max_conns: config.max_conns,
        })?;

        pool.with_conn(false, "", |tx| {
            tx.execute_batch(SCHEMA)?;
            Ok(())
        })?;

        let index = SearchIndex::open(config.index_dir.as_deref())?;

        Ok(Self {
            pool: Arc::new(pool),
            index: Arc::new(index),
        })
    }

    /// Whether full-text search is available.
    pub fn search_enabled(&self) -> bool {
        self.index.enabled()
    }

    /// Keyed existence probe, used by non-time-keyed deduplication.
    pub fn exists(&self, field: Field, value: &str) -> Result<bool> {
        let query = QueryBuilder::new("select 1 from events {events}")
            .add_clause(
                &format!("{{events}}.{} = ?", field.as_str()),
                vec![Value::Text(value.to_string())],
            )
            .limit(Some(1));

        let sql = query.format();
        let params = query.into_params();

        self.pool.read(|tx| {
            let mut stmt = tx.prepare(&sql)?;
            Ok(stmt.exists(params_from_iter(params.iter()))?)
        })
    }

    /// Idempotent batch insert: conflicting ids are skipped, children are
    /// upserted with their related flag forced, and the search index is
    /// updated in lockstep. One transaction per batch.
    pub fn add_events(&self, events: &[Event], dry: bool) -> Result<()> {
        self.pool
            .with_conn(dry, "rolled back new event changes", |tx| {
                for event in events {
                    insert_event_tree(tx, event)?;
                }
                Ok(())
            })?;

        self.index.index(events, dry)
    }

    /// Update mutable event fields. A nonexistent id fails the whole batch.
    pub fn update_events(&self, events: &[Event], dry: bool) -> Result<()> {
        self.pool
            .with_conn(dry, "rolled back update event changes", |tx| {
                for event in events {
                    let updated = tx.execute(
                        "update events set title = ?, text = ?, link = ?, occurred = ?, \
                         raw = ?, thumbnail = ?, original = ?, archived = ? where id = ?",
                        params_from_iter([
                            text_value(&event.title),
                            text_value(&event.text),
                            text_value(&event.link),
                            Value::Integer(event.occurred.timestamp_micros()),
                            json_value(&event.raw)?,
                            json_value(&event.thumbnail)?,
                            json_value(&event.original)?,
                            json_value(&event.archived)?,
                            Value::Text(event.id.clone()),
                        ]),
                    )?;

                    if updated == 0 {
                        return Err(Error::MissingEventId(event.id.clone()));
                    }

                    debug!(event = %event.id, "updated event");
                }
                Ok(())
            })?;

        self.index.index(events, dry)
    }

    /// Remove specific events (with their children and links) or every
    /// event belonging to a feed. A no-op when called with neither.
    pub fn remove_events(
        &self,
        events: Option<&[Event]>,
        feed: Option<&str>,
        dry: bool,
    ) -> Result<()> {
        if events.is_none() && feed.is_none() {
            return Ok(());
        }

        self.pool
            .with_conn(dry, "rolled back remove event changes", |tx| {
                if let Some(events) = events {
                    for event in events {
                        if let Some(children) = &event.related {
                            tx.execute(
                                "delete from related_events where parent = ?",
                                [&event.id],
                            )?;
                            for child in children {
                                tx.execute("delete from events where id = ?", [&child.id])?;
                            }
                        }

                        let removed = tx.execute("delete from events where id = ?", [&event.id])?;
                        if removed == 0 {
                            return Err(Error::MissingEventId(event.id.clone()));
                        }
                        debug!(event = %event.id, "removed event");
                    }
                } else if let Some(feed) = feed {
                    tx.execute(
                        "delete from related_events where parent in \
                         (select id from events where feed_id in \
                          (select id from feeds where short_name = ?))",
                        [feed],
                    )?;
                    tx.execute(
                        "delete from events where feed_id in \
                         (select id from feeds where short_name = ?)",
                        [feed],
                    )?;
                    info!(feed, "removed all events for feed");
                }
                Ok(())
            })?;

        self.index.remove(events, feed, dry)
    }

    /// Feed configurations keyed by short name, optionally filtered on the
    /// boolean flags.
    pub fn get_feeds(&self, filter: &FeedFilter) -> Result<HashMap<String, FeedConfig>> {
        let mut query = QueryBuilder::new(
            "select id, short_name, full_name, color, favicon, module, config, \
             is_public, is_updating, is_searchable from feeds",
        );

        for (flag, value) in [
            ("is_public", filter.is_public),
            ("is_updating", filter.is_updating),
            ("is_searchable", filter.is_searchable),
        ] {
            if let Some(value) = value {
                query = query.add_clause(
                    &format!("{flag} = ?"),
                    vec![Value::Integer(value as i64)],
                );
            }
        }

        let sql = query.format();
        let params = query.into_params();

        let rows: Vec<(FeedConfig, Option<String>)> = self.pool.read(|tx| {
            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let config = FeedConfig {
                    info: FeedInfo {
                        id: row.get(0)?,
                        short_name: row.get(1)?,
                        full_name: row.get(2)?,
                        color: row.get(3)?,
                        favicon: row.get(4)?,
                    },
                    flags: FeedFlags {
                        is_public: row.get(7)?,
                        is_updating: row.get(8)?,
                        is_searchable: row.get(9)?,
                    },
                    module: row.get(5)?,
                    overrides: None,
                };
                out.push((config, row.get::<_, Option<String>>(6)?));
            }
            Ok(out)
        })?;

        let mut feeds = HashMap::new();
        for (mut config, overrides) in rows {
            config.overrides = overrides.as_deref().map(serde_json::from_str).transpose()?;
            feeds.insert(config.info.short_name.clone(), config);
        }

        Ok(feeds)
    }

    /// Insert feed configurations.
    pub fn add_feeds(&self, feeds: &[FeedConfig], dry: bool) -> Result<()> {
        self.pool
            .with_conn(dry, "rolled back new feed changes", |tx| {
                for feed in feeds {
                    tx.execute(
                        "insert into feeds (id, short_name, full_name, color, favicon, \
                         module, config, is_public, is_updating, is_searchable) \
                         values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        params_from_iter([
                            Value::Text(feed.info.id.clone()),
                            Value::Text(feed.info.short_name.clone()),
                            Value::Text(feed.info.full_name.clone()),
                            Value::Text(feed.info.color.clone()),
                            text_value(&feed.info.favicon),
                            Value::Text(feed.module.clone()),
                            json_value(&feed.overrides)?,
                            Value::Integer(feed.flags.is_public as i64),
                            Value::Integer(feed.flags.is_updating as i64),
                            Value::Integer(feed.flags.is_searchable as i64),
                        ]),
                    )?;
                }
                Ok(())
            })
    }

    /// Persist feed configuration changes (including connector overrides).
    /// A nonexistent feed id fails the whole batch.
    pub fn update_feeds(&self, feeds: &[FeedConfig], dry: bool) -> Result<()> {
        self.pool
            .with_conn(dry, "rolled back update feed changes", |tx| {
                for feed in feeds {
                    info!(feed = %feed.info.short_name, "updating feed");

                    let updated = tx.execute(
                        "update feeds set short_name = ?, full_name = ?, color = ?, \
                         favicon = ?, module = ?, config = ?, is_public = ?, \
                         is_updating = ?, is_searchable = ? where id = ?",
                        params_from_iter([
                            Value::Text(feed.info.short_name.clone()),
                            Value::Text(feed.info.full_name.clone()),
                            Value::Text(feed.info.color.clone()),
                            text_value(&feed.info.favicon),
                            Value::Text(feed.module.clone()),
                            json_value(&feed.overrides)?,
                            Value::Integer(feed.flags.is_public as i64),
                            Value::Integer(feed.flags.is_updating as i64),
                            Value::Integer(feed.flags.is_searchable as i64),
                            Value::Text(feed.info.id.clone()),
                        ]),
                    )?;

                    if updated == 0 {
                        return Err(Error::MissingFeedId(feed.info.id.clone()));
                    }
                }
                Ok(())
            })
    }

    /// Events within an exclusive time range, newest first.
    pub fn get_events_by_timerange(&self, spec: &TimeRangeQuery) -> QueryResultSet {
        let mut base = QueryBuilder::new("select {events}.* from events {events}");

        if spec.feeds.is_some() {
            base = base.append(", feeds {feeds} where {events}.feed_id = {feeds}.id");
        }

        let embed_related = spec.embed_related && !spec.flattened;
        let mut query = EventQuery::new(base, true, embed_related);

        if let Some(before) = spec.before {
            query.add_clause(
                "{events}.occurred < ?",
                vec![Value::Integer(before.timestamp_micros())],
            );
        }

        if let Some(after) = spec.after {
            query.add_clause(
                "{events}.occurred > ?",
                vec![Value::Integer(after.timestamp_micros())],
            );
        }

        if let Some(feeds) = &spec.feeds {
            let placeholders = vec!["?"; feeds.len()].join(", ");
            query.add_clause(
                &format!("{{feeds}}.short_name in ({placeholders})"),
                feeds.iter().map(|f| Value::Text(f.clone())).collect(),
            );
        }

        if !spec.flattened {
            query.add_clause("{events}.is_related = 0", Vec::new());
        }

        QueryResultSet::new(self.pool.clone(), query, spec.pagesize, spec.timezone)
    }

    /// Events over one calendar day, interpreted in the requested timezone.
    pub fn get_events_by_date(
        &self,
        date: NaiveDate,
        spec: &TimeRangeQuery,
    ) -> Result<QueryResultSet> {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::InvalidDate(date.to_string()))?;

        let start = match spec.timezone {
            Some(tz) => tz
                .from_local_datetime(&midnight)
                .earliest()
                .ok_or_else(|| Error::InvalidDate(date.to_string()))?
                .with_timezone(&Utc),
            None => Utc.from_utc_datetime(&midnight),
        };

        let mut spec = spec.clone();
        spec.after = Some(start - Duration::microseconds(1));
        spec.before = Some(start + Duration::days(1));

        Ok(self.get_events_by_timerange(&spec))
    }

    /// Events by id. Malformed UUIDs are dropped; an all-invalid input
    /// yields an intentionally empty result set.
    pub fn get_events_by_ids(
        &self,
        ids: &[String],
        pagesize: usize,
        timezone: Option<Tz>,
        embed_related: bool,
    ) -> QueryResultSet {
        let validated: HashSet<String> = ids
            .iter()
            .filter(|id| Uuid::parse_str(id).is_ok())
            .cloned()
            .collect();

        let base = QueryBuilder::new("select {events}.* from events {events}");
        let mut query = EventQuery::new(base, true, embed_related);

        if validated.is_empty() {
            query.add_clause("1 = 0", Vec::new());
        } else {
            let placeholders = vec!["?"; validated.len()].join(", ");
            query.add_clause(
                &format!("{{events}}.id in ({placeholders})"),
                validated.into_iter().map(Value::Text).collect(),
            );
        }

        QueryResultSet::new(self.pool.clone(), query, pagesize, timezone)
    }

    fn latest_query(&self, feed: Option<&str>) -> QueryResultSet {
        let mut base = QueryBuilder::new(
            "select {events}.* from events {events} inner join ( \
                 select id from ( \
                     select id, row_number() over ( \
                         partition by feed_id order by occurred desc, id desc \
                     ) as rank from events where is_related = 0 \
                 ) ranked where rank = 1 \
             ) latest on latest.id = {events}.id",
        );

        if feed.is_some() {
            base = base.append("inner join feeds {feeds} on {events}.feed_id = {feeds}.id");
        }

        let mut query = EventQuery::new(base, true, true);

        if let Some(feed) = feed {
            query.add_clause(
                "{feeds}.short_name = ?",
                vec![Value::Text(feed.to_string())],
            );
        }

        QueryResultSet::new(self.pool.clone(), query, 10, None)
    }

    /// The newest top-level event for each feed, keyed by short name.
    pub fn get_events_by_latest(&self) -> Result<HashMap<String, Event>> {
        let events = self.latest_query(None).iterate()?;

        Ok(events
            .into_iter()
            .filter_map(|event| {
                event
                    .feed
                    .as_ref()
                    .map(|feed| (feed.short_name.clone(), event.clone()))
            })
            .collect())
    }

    /// The newest top-level event for one feed.
    pub fn get_latest_event(&self, feed: &str) -> Result<Option<Event>> {
        let events = self.latest_query(Some(feed)).iterate()?;
        Ok(events.into_iter().next())
    }

    /// Full-text retrieval. `None` when search indexing is disabled.
    pub fn get_events_by_search(
        &self,
        query: &str,
        spec: &SearchQuery,
    ) -> Option<SearchResultSet> {
        if !self.index.enabled() {
            return None;
        }

        Some(SearchResultSet::new(
            self.pool.clone(),
            self.index.clone(),
            query.to_string(),
            spec.pagesize,
            spec.timezone,
            SearchConstraints {
                filter: spec.to_filter.clone(),
                mask: spec.to_mask.clone(),
                after: spec.after,
                before: spec.before,
                frozen: None,
            },
        ))
    }

    /// Rebuild the search index from the relational store. Returns the
    /// number of documents written. In dry mode the existing index is left
    /// untouched and every batch rolls back.
    pub fn reindex(&self, batch_size: usize, dry: bool) -> Result<usize> {
        if !self.index.enabled() {
            return Ok(0);
        }

        if !dry {
            self.index.clear()?;
        }

        let mut set = self.get_events_by_timerange(&TimeRangeQuery {
            pagesize: batch_size,
            ..Default::default()
        });

        let mut documents = 0;
        for page in set.pages() {
            let page = page?;
            documents += page
                .events
                .iter()
                .map(|event| event.documents().len())
                .sum::<usize>();
            self.index.index(&page.events, dry)?;
        }

        Ok(documents)
    }
}
