//! Full-text search index over events.
//!
//! Documents are keyed by event id with fields {id, feed, title, text} plus
//! the occurrence time for sorting and range masking. Writer sessions across
//! the whole index are serialized by a single mutex; `dry` mode rolls the
//! writer session back instead of committing. An index constructed without a
//! directory is disabled: every operation is a safe no-op.

use crate::error::Result;
use chrono::{DateTime, Utc};
use chronolog_core::Event;
use parking_lot::Mutex;
use std::ops::Bound;
use std::path::Path;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, RangeQuery, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, Value, FAST, INDEXED, STORED, STRING, TEXT,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, Order, TantivyDocument, Term};
use tracing::{debug, info};

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
struct SchemaFields {
    id: Field,
    feed: Field,
    title: Field,
    text: Field,
    occurred: Field,
}

struct Inner {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

/// Feed and time constraints applied to a search.
#[derive(Debug, Clone, Default)]
pub struct SearchConstraints {
    /// Restrict hits to these feeds.
    pub filter: Option<Vec<String>>,
    /// Exclude hits from these feeds.
    pub mask: Option<Vec<String>>,
    /// Exclusive lower time bound.
    pub after: Option<DateTime<Utc>>,
    /// Exclusive upper time bound.
    pub before: Option<DateTime<Utc>>,
    /// Inclusive upper time bound captured from a result set's first page,
    /// keeping subsequent pages stable under concurrent inserts.
    pub frozen: Option<DateTime<Utc>>,
}

/// One page of search hits plus result-set metadata.
#[derive(Debug, Clone)]
pub struct SearchHits {
    /// Total matching documents.
    pub total: usize,
    /// Occurrence time of the most recent hit (first hit of the page).
    pub latest: Option<DateTime<Utc>>,
    /// Matching event ids in ranked order.
    pub ids: Vec<String>,
}

/// Inverted full-text index over (id, feed, title, text).
pub struct SearchIndex {
    inner: Option<Inner>,
    writer_lock: Mutex<()>,
}

impl SearchIndex {
    /// Open or create the index under `dir`. `None` yields a disabled
    /// index where indexing and removal are no-ops.
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = dir else {
            info!("search indexing disabled, no index directory configured");
            return Ok(Self {
                inner: None,
                writer_lock: Mutex::new(()),
            });
        };

        std::fs::create_dir_all(dir)?;

        let mut builder = Schema::builder();
        let fields = SchemaFields {
            id: builder.add_text_field("id", STRING | STORED),
            feed: builder.add_text_field("feed", STRING),
            title: builder.add_text_field("title", TEXT),
            text: builder.add_text_field("text", TEXT),
            occurred: builder.add_i64_field("occurred", INDEXED | STORED | FAST),
        };
        let schema = builder.build();

        let index = Index::open_or_create(MmapDirectory::open(dir)?, schema)?;
        let reader = index.reader()?;

        debug!(dir = %dir.display(), "search index ready");

        Ok(Self {
            inner: Some(Inner {
                index,
                reader,
                fields,
            }),
            writer_lock: Mutex::new(()),
        })
    }

    pub fn enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Index a batch of events (and their related children) in one writer
    /// session. Existing documents with the same id are replaced.
    pub fn index(&self, events: &[Event], dry: bool) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        if events.is_empty() {
            return Ok(());
        }

        let _guard = self.writer_lock.lock();
        let mut writer: IndexWriter = inner.index.writer(WRITER_HEAP_BYTES)?;
        let fields = inner.fields;

        for event in events {
            for document in event.documents() {
                writer.delete_term(Term::from_field_text(fields.id, &document.id));
                writer.add_document(doc!(
                    fields.id => document.id,
                    fields.feed => document.feed,
                    fields.title => document.title,
                    fields.text => document.text,
                    fields.occurred => document.occurred.timestamp_micros(),
                ))?;
            }

            let related = event.related.as_ref().map_or(0, |r| r.len());
            debug!(event = %event.id, related, "indexed event");
        }

        if dry {
            writer.rollback()?;
        } else {
            writer.commit()?;
            inner.reader.reload()?;
        }

        Ok(())
    }

    /// Remove documents by event (covering children) or by whole feed.
    pub fn remove(&self, events: Option<&[Event]>, feed: Option<&str>, dry: bool) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        if events.is_none() && feed.is_none() {
            debug!("received nothing to remove");
            return Ok(());
        }

        let _guard = self.writer_lock.lock();
        let mut writer: IndexWriter = inner.index.writer(WRITER_HEAP_BYTES)?;
        let fields = inner.fields;

        if let Some(events) = events {
            for event in events {
                for document in event.documents() {
                    writer.delete_term(Term::from_field_text(fields.id, &document.id));
                }
            }
        } else if let Some(feed) = feed {
            writer.delete_term(Term::from_field_text(fields.feed, feed));
            info!(feed, "removed all documents for feed");
        }

        if dry {
            writer.rollback()?;
        } else {
            writer.commit()?;
            inner.reader.reload()?;
        }

        Ok(())
    }

    /// Drop every document. Used by the reindex pass.
    pub fn clear(&self) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let _guard = self.writer_lock.lock();
        let mut writer: IndexWriter = inner.index.writer(WRITER_HEAP_BYTES)?;
        writer.delete_all_documents()?;
        writer.commit()?;
        inner.reader.reload()?;

        Ok(())
    }

    /// Run a query over title+text and return the requested 1-based page of
    /// matching ids, ordered by occurrence time descending.
    ///
    /// When both a feed filter and a feed mask are given, the smaller of the
    /// two drives the boolean constraint.
    pub fn search(
        &self,
        query: &str,
        page: usize,
        pagesize: usize,
        constraints: &SearchConstraints,
    ) -> Result<SearchHits> {
        let Some(inner) = &self.inner else {
            return Ok(SearchHits {
                total: 0,
                latest: None,
                ids: Vec::new(),
            });
        };

        let fields = inner.fields;
        let parser = QueryParser::for_index(&inner.index, vec![fields.title, fields.text]);
        let parsed = parser.parse_query(query)?;

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, parsed)];

        let feed_terms = |feeds: &[String]| -> Box<dyn Query> {
            let terms: Vec<Box<dyn Query>> = feeds
                .iter()
                .map(|feed| {
                    Box::new(TermQuery::new(
                        Term::from_field_text(fields.feed, feed),
                        IndexRecordOption::Basic,
                    )) as Box<dyn Query>
                })
                .collect();
            Box::new(BooleanQuery::union(terms))
        };

        match (&constraints.filter, &constraints.mask) {
            (Some(filter), Some(mask)) if mask.len() < filter.len() => {
                clauses.push((Occur::MustNot, feed_terms(mask)));
            }
            (Some(filter), _) => {
                clauses.push((Occur::Must, feed_terms(filter)));
            }
            (None, Some(mask)) => {
                clauses.push((Occur::MustNot, feed_terms(mask)));
            }
            (None, None) => {}
        }

        let lower = match constraints.after {
            Some(after) => Bound::Excluded(after.timestamp_micros()),
            None => Bound::Unbounded,
        };

        // The frozen boundary is inclusive (it came from the top hit); a
        // caller-provided `before` is exclusive. The tighter one wins.
        let upper = match (constraints.before, constraints.frozen) {
            (Some(before), Some(frozen)) if before <= frozen => {
                Bound::Excluded(before.timestamp_micros())
            }
            (_, Some(frozen)) => Bound::Included(frozen.timestamp_micros()),
            (Some(before), None) => Bound::Excluded(before.timestamp_micros()),
            (None, None) => Bound::Unbounded,
        };

        if !matches!((lower, upper), (Bound::Unbounded, Bound::Unbounded)) {
            clauses.push((
                Occur::Must,
                Box::new(RangeQuery::new_i64_bounds(
                    "occurred".to_string(),
                    lower,
                    upper,
                )),
            ));
        }

        let boolean = BooleanQuery::new(clauses);
        let searcher = inner.reader.searcher();

        let offset = page.saturating_sub(1) * pagesize;
        let collector = TopDocs::with_limit(pagesize)
            .and_offset(offset)
            .order_by_fast_field::<i64>("occurred", Order::Desc);

        let (ordered, total) = searcher.search(&boolean, &(collector, Count))?;

        let latest = ordered
            .first()
            .and_then(|(occurred, _)| DateTime::from_timestamp_micros(*occurred));

        let mut ids = Vec::with_capacity(ordered.len());
        for (_, address) in ordered {
            let document: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = document.get_first(fields.id).and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }

        Ok(SearchHits { total, latest, ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn event(feed: &str, title: &str, secs: i64) -> Event {
        let mut e = Event::new(Utc.timestamp_opt(secs, 0).unwrap());
        e.feed = Some(chronolog_core::FeedInfo {
            id: format!("{feed}-id"),
            short_name: feed.to_string(),
            full_name: feed.to_string(),
            color: "000000".to_string(),
            favicon: None,
        });
        e.title = Some(title.to_string());
        e
    }

    fn open(dir: &TempDir) -> SearchIndex {
        SearchIndex::open(Some(dir.path())).unwrap()
    }

    #[test]
    fn test_disabled_index_is_noop() {
        let index = SearchIndex::open(None).unwrap();
        assert!(!index.enabled());

        index.index(&[event("a", "hello", 100)], false).unwrap();
        index.remove(None, Some("a"), false).unwrap();

        let hits = index
            .search("hello", 1, 10, &SearchConstraints::default())
            .unwrap();
        assert_eq!(hits.total, 0);
    }

    #[test]
    fn test_index_and_search_orders_by_occurrence() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index
            .index(
                &[
                    event("a", "things changed early", 1_000),
                    event("a", "things changed late", 2_000),
                    event("a", "unrelated entry", 3_000),
                ],
                false,
            )
            .unwrap();

        let hits = index
            .search("changed", 1, 10, &SearchConstraints::default())
            .unwrap();

        assert_eq!(hits.total, 2);
        assert_eq!(
            hits.latest,
            Some(Utc.timestamp_opt(2_000, 0).unwrap())
        );
        assert_eq!(hits.ids.len(), 2);
    }

    #[test]
    fn test_dry_indexing_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index.index(&[event("a", "dry entry", 100)], true).unwrap();

        let hits = index
            .search("dry", 1, 10, &SearchConstraints::default())
            .unwrap();
        assert_eq!(hits.total, 0);
    }

    #[test]
    fn test_filter_restricts_to_named_feeds() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index
            .index(
                &[
                    event("feedx", "changed something", 100),
                    event("feedy", "changed something else", 200),
                ],
                false,
            )
            .unwrap();

        let constraints = SearchConstraints {
            filter: Some(vec!["feedx".to_string()]),
            ..Default::default()
        };
        let hits = index.search("changed", 1, 10, &constraints).unwrap();
        assert_eq!(hits.total, 1);
    }

    #[test]
    fn test_mask_excludes_named_feeds() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index
            .index(
                &[
                    event("feedx", "changed something", 100),
                    event("feedy", "changed something else", 200),
                ],
                false,
            )
            .unwrap();

        let constraints = SearchConstraints {
            mask: Some(vec!["feedy".to_string()]),
            ..Default::default()
        };
        let hits = index.search("changed", 1, 10, &constraints).unwrap();
        assert_eq!(hits.total, 1);
    }

    #[test]
    fn test_frozen_boundary_hides_later_inserts() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index
            .index(&[event("a", "changed once", 1_000)], false)
            .unwrap();

        let frozen = Utc.timestamp_opt(1_000, 0).unwrap();

        index
            .index(&[event("a", "changed again", 2_000)], false)
            .unwrap();

        let constraints = SearchConstraints {
            frozen: Some(frozen),
            ..Default::default()
        };
        let hits = index.search("changed", 1, 10, &constraints).unwrap();

        // Inclusive of the frozen hit itself, exclusive of the newer one.
        assert_eq!(hits.total, 1);
    }

    #[test]
    fn test_remove_by_feed() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        index
            .index(
                &[
                    event("feedx", "changed", 100),
                    event("feedy", "changed", 200),
                ],
                false,
            )
            .unwrap();

        index.remove(None, Some("feedx"), false).unwrap();

        let hits = index
            .search("changed", 1, 10, &SearchConstraints::default())
            .unwrap();
        assert_eq!(hits.total, 1);
    }

    #[test]
    fn test_indexing_covers_related_children() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        let mut parent = event("a", "parent entry", 1_000);
        let mut child = event("a", "child entry", 1_060);
        child.feed = None;
        parent.add_related(child);

        index.index(&[parent], false).unwrap();

        let hits = index
            .search("entry", 1, 10, &SearchConstraints::default())
            .unwrap();
        assert_eq!(hits.total, 2);
    }
}
