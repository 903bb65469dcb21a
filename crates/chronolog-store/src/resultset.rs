//! Filtered, ordered, pageable views over events.
//!
//! Two implementations share one contract: [`QueryResultSet`] pages the
//! relational store with a keyset cursor, [`SearchResultSet`] pages search
//! hits by page number and joins them back to the relational store. Both
//! cache their count after first computation.

use crate::error::{Error, Result};
use crate::eventquery::EventQuery;
use crate::pool::ConnectionPool;
use crate::query::QueryBuilder;
use crate::search::{SearchConstraints, SearchIndex};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use chronolog_core::{Cursor, Event, Page};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A filtered, ordered collection of events.
pub trait ResultSet {
    /// Total matching events. Cached after the first computation.
    fn count(&mut self) -> Result<usize>;

    /// One page of events. `cursor` repositions the set; `None` continues
    /// from the last served page (or the beginning).
    fn page(&mut self, cursor: Option<Cursor>) -> Result<Page>;

    /// Full unpaginated scan.
    fn iterate(&mut self) -> Result<Vec<Event>>;

    /// Lazy sequence of all pages until exhaustion.
    fn pages(&mut self) -> Pages<'_>
    where
        Self: Sized,
    {
        Pages {
            set: self,
            done: false,
        }
    }
}

/// Iterator over a result set's pages.
pub struct Pages<'a> {
    set: &'a mut dyn ResultSet,
    done: bool,
}

impl Iterator for Pages<'_> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.set.page(None) {
            Ok(page) => {
                if page.next.is_none() {
                    self.done = true;
                }
                Some(Ok(page))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn fetch_documents(pool: &ConnectionPool, sql: &str, params: &[Value]) -> Result<Vec<Event>> {
    let documents: Vec<String> = pool.read(|tx| {
        let mut stmt = tx.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(row.get::<_, String>(0)?);
        }
        Ok(documents)
    })?;

    documents
        .into_iter()
        .map(|doc| Ok(serde_json::from_str(&doc)?))
        .collect()
}

/// Keyset-paginated result set over the relational store.
pub struct QueryResultSet {
    pool: Arc<ConnectionPool>,
    query: EventQuery,
    pagesize: usize,
    timezone: Option<Tz>,
    cursor: Option<Cursor>,
    count: Option<usize>,
}

impl QueryResultSet {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        query: EventQuery,
        pagesize: usize,
        timezone: Option<Tz>,
    ) -> Self {
        Self {
            pool,
            query,
            pagesize,
            timezone,
            cursor: None,
            count: None,
        }
    }
}

impl ResultSet for QueryResultSet {
    fn count(&mut self) -> Result<usize> {
        if let Some(count) = self.count {
            return Ok(count);
        }

        let sql = self.query.count_sql();
        let params = self.query.count_params();
        let count: i64 = self.pool.read(|tx| {
            Ok(tx.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?)
        })?;

        self.count = Some(count as usize);
        Ok(count as usize)
    }

    fn page(&mut self, cursor: Option<Cursor>) -> Result<Page> {
        match cursor {
            Some(Cursor::ByTime { .. }) => self.cursor = cursor,
            Some(Cursor::ByPage(_)) => {
                return Err(Error::Core(chronolog_core::Error::InvalidCursor(
                    "expected a keyset cursor".to_string(),
                )))
            }
            None => {}
        }

        let mut query = self.query.clone();
        query.set_cursor(self.cursor.as_ref());
        query.set_limit(Some(self.pagesize));

        let events = fetch_documents(&self.pool, &query.sql(), &query.params())?;

        // A full page sets up the next cursor from its last row; a short
        // page means the set is exhausted.
        self.cursor = match events.last() {
            Some(last) if events.len() == self.pagesize => Some(Cursor::ByTime {
                occurred: last.occurred,
                id: last.id.clone(),
            }),
            _ => None,
        };

        Ok(Page::new(events, self.cursor.clone(), self.timezone))
    }

    fn iterate(&mut self) -> Result<Vec<Event>> {
        let mut query = self.query.clone();
        query.set_cursor(None);
        query.set_limit(None);

        fetch_documents(&self.pool, &query.sql(), &query.params())
    }
}

/// Search-backed result set: page numbers over index hits, joined back to
/// the relational store and re-ordered to the index's ranking.
pub struct SearchResultSet {
    pool: Arc<ConnectionPool>,
    index: Arc<SearchIndex>,
    query: String,
    pagesize: usize,
    timezone: Option<Tz>,
    constraints: SearchConstraints,
    metadata: Option<SearchMetadata>,
    cursor: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct SearchMetadata {
    total: usize,
    latest: Option<DateTime<Utc>>,
}

impl SearchResultSet {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        index: Arc<SearchIndex>,
        query: String,
        pagesize: usize,
        timezone: Option<Tz>,
        constraints: SearchConstraints,
    ) -> Self {
        Self {
            pool,
            index,
            query,
            pagesize,
            timezone,
            constraints,
            metadata: None,
            cursor: None,
        }
    }

    /// Occurrence time of the most recent hit, if any.
    pub fn latest(&mut self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.metadata()?.latest)
    }

    /// First use computes the hit count and captures the top hit's
    /// timestamp as a frozen upper boundary, so pages served later are not
    /// shifted by concurrently inserted newer matches.
    fn metadata(&mut self) -> Result<SearchMetadata> {
        if let Some(metadata) = self.metadata {
            return Ok(metadata);
        }

        let hits = self
            .index
            .search(&self.query, 1, self.pagesize, &self.constraints)?;

        let metadata = SearchMetadata {
            total: hits.total,
            latest: hits.latest,
        };

        self.metadata = Some(metadata);
        self.constraints.frozen = hits.latest;

        Ok(metadata)
    }

    fn num_pages(&mut self) -> Result<usize> {
        let total = self.metadata()?.total;
        Ok(total.div_ceil(self.pagesize))
    }

    fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let params: Vec<Value> = ids.iter().map(|id| Value::Text(id.clone())).collect();

        let base = QueryBuilder::new("select {events}.* from events {events}").add_clause(
            &format!("{{events}}.id in ({placeholders})"),
            params,
        );
        let query = EventQuery::new(base, true, false);

        let events = fetch_documents(&self.pool, &query.sql(), &query.params())?;

        // Re-order to match the index's ranking.
        let mut by_id: HashMap<String, Event> = events
            .into_iter()
            .map(|event| (event.id.clone(), event))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

impl ResultSet for SearchResultSet {
    fn count(&mut self) -> Result<usize> {
        Ok(self.metadata()?.total)
    }

    fn page(&mut self, cursor: Option<Cursor>) -> Result<Page> {
        let page_no = match cursor {
            Some(Cursor::ByPage(page)) => {
                self.cursor = Some(page);
                page
            }
            Some(Cursor::ByTime { .. }) => {
                return Err(Error::Core(chronolog_core::Error::InvalidCursor(
                    "expected a search page cursor".to_string(),
                )))
            }
            None => self.cursor.unwrap_or(1),
        };

        if page_no == 0 {
            return Err(Error::InvalidPage(page_no));
        }

        let total = self.metadata()?.total;

        if total == 0 {
            if page_no == 1 {
                self.cursor = None;
                return Ok(Page::new(Vec::new(), None, self.timezone));
            }
            return Err(Error::InvalidPage(page_no));
        }

        let num_pages = self.num_pages()?;
        if page_no as usize > num_pages {
            return Err(Error::InvalidPage(page_no));
        }

        let hits = self.index.search(
            &self.query,
            page_no as usize,
            self.pagesize,
            &self.constraints,
        )?;

        let events = self.fetch_by_ids(&hits.ids)?;

        let next = if (page_no as usize) < num_pages {
            Some(Cursor::ByPage(page_no + 1))
        } else {
            None
        };

        self.cursor = match next {
            Some(Cursor::ByPage(page)) => Some(page),
            _ => None,
        };

        Ok(Page::new(events, next, self.timezone))
    }

    fn iterate(&mut self) -> Result<Vec<Event>> {
        let num_pages = self.num_pages()?;
        let mut events = Vec::new();

        for page_no in 1..=num_pages {
            let page = self.page(Some(Cursor::ByPage(page_no as u32)))?;
            events.extend(page.events);
        }

        Ok(events)
    }
}
