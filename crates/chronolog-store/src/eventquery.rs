//! Single-round-trip event projection.
//!
//! [`EventQuery`] wraps a [`QueryBuilder`] in a template that returns one
//! JSON document per row, optionally embedding the owning feed's public
//! fields and an occurred-ascending array of related child events — a
//! parent-with-children view read as one atomic snapshot instead of N+1
//! follow-up queries.

use crate::query::QueryBuilder;
use chronolog_core::Cursor;
use rusqlite::types::Value;

const EVENT_COLUMNS: &str = "'id', base.id, 'title', base.title, 'text', base.text, \
     'link', base.link, 'occurred', base.occurred, 'raw', json(base.raw), \
     'thumbnail', json(base.thumbnail), 'original', json(base.original), \
     'archived', json(base.archived)";

const FEED_OBJECT: &str = ", 'feed', (select json_object(\
     'id', f.id, 'short_name', f.short_name, 'full_name', f.full_name, \
     'color', f.color, 'favicon', f.favicon) \
     from feeds f where f.id = base.feed_id)";

// Children aggregate as an occurred-ascending JSON array; nullif turns an
// empty array into a JSON null so childless events deserialize to None.
const RELATED_ARRAY: &str = ", 'related', (select nullif(json_group_array(json_object(\
     'id', c.id, 'title', c.title, 'text', c.text, 'link', c.link, \
     'occurred', c.occurred, 'raw', json(c.raw), 'thumbnail', json(c.thumbnail), \
     'original', json(c.original), 'archived', json(c.archived)) \
     order by c.occurred asc), '[]') \
     from related_events re inner join events c on c.id = re.child \
     where re.parent = base.id)";

/// A query template projecting event rows as JSON documents.
#[derive(Debug, Clone)]
pub struct EventQuery {
    base: QueryBuilder,
    embed_feeds: bool,
    embed_related: bool,
    cursor: Option<(i64, String)>,
    limit: Option<usize>,
}

impl EventQuery {
    pub fn new(base: QueryBuilder, embed_feeds: bool, embed_related: bool) -> Self {
        Self {
            base,
            embed_feeds,
            embed_related,
            cursor: None,
            limit: None,
        }
    }

    pub fn add_clause(&mut self, clause: &str, params: Vec<Value>) {
        self.base = self.base.clone().add_clause(clause, params);
    }

    /// Position the query after a keyset cursor. Non-keyset cursors clear
    /// the position.
    pub fn set_cursor(&mut self, cursor: Option<&Cursor>) {
        self.cursor = match cursor {
            Some(Cursor::ByTime { occurred, id }) => {
                Some((occurred.timestamp_micros(), id.clone()))
            }
            _ => None,
        };
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    fn effective_base(&self) -> QueryBuilder {
        let mut base = self.base.clone();
        if let Some((occurred, id)) = &self.cursor {
            base = base.add_clause(
                "({events}.occurred, {events}.id) < (?, ?)",
                vec![Value::Integer(*occurred), Value::Text(id.clone())],
            );
        }
        base
    }

    /// The full projection statement.
    pub fn sql(&self) -> String {
        let mut columns = String::from(EVENT_COLUMNS);

        if self.embed_feeds {
            columns.push_str(FEED_OBJECT);
        }

        if self.embed_related {
            columns.push_str(RELATED_ARRAY);
        }

        let mut sql = format!(
            "with base as ({}) select json_object({}) from base \
             order by base.occurred desc, base.id desc",
            self.effective_base().format(),
            columns
        );

        if let Some(limit) = self.limit {
            sql = format!("{sql} limit {limit}");
        }

        sql
    }

    pub fn params(&self) -> Vec<Value> {
        self.effective_base().into_params()
    }

    /// Count over the base query alone, ignoring cursor and limit.
    pub fn count_sql(&self) -> String {
        format!("select count(*) from ({}) t", self.base.format())
    }

    pub fn count_params(&self) -> Vec<Value> {
        self.base.clone().into_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn base() -> QueryBuilder {
        QueryBuilder::new("select {events}.* from events {events}")
    }

    #[test]
    fn test_sql_orders_descending_with_id_tiebreak() {
        let eq = EventQuery::new(base(), true, true);
        let sql = eq.sql();

        assert!(sql.starts_with("with base as (select e.* from events e)"));
        assert!(sql.contains("order by base.occurred desc, base.id desc"));
        assert!(sql.contains("'feed'"));
        assert!(sql.contains("'related'"));
    }

    #[test]
    fn test_embeds_are_optional() {
        let sql = EventQuery::new(base(), false, false).sql();
        assert!(!sql.contains("'feed'"));
        assert!(!sql.contains("'related'"));
    }

    #[test]
    fn test_cursor_adds_keyset_predicate() {
        let mut eq = EventQuery::new(base(), false, false);
        eq.set_cursor(Some(&Cursor::ByTime {
            occurred: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            id: "abc".to_string(),
        }));

        assert!(eq.sql().contains("(e.occurred, e.id) < (?, ?)"));
        assert_eq!(eq.params().len(), 2);
    }

    #[test]
    fn test_count_ignores_cursor_and_limit() {
        let mut eq = EventQuery::new(base(), true, true);
        eq.set_cursor(Some(&Cursor::ByTime {
            occurred: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            id: "abc".to_string(),
        }));
        eq.set_limit(Some(10));

        let count_sql = eq.count_sql();
        assert_eq!(count_sql, "select count(*) from (select e.* from events e) t");
        assert!(eq.count_params().is_empty());
    }
}
