//! Composable query fragments.
//!
//! A [`QueryBuilder`] accumulates a base statement with symbolic table
//! aliases (`{events}`, `{feeds}`) resolved at format time, filter clauses
//! (`where` for the first, `and` thereafter) and their positional params,
//! plus optional ORDER BY / LIMIT attachments.

use rusqlite::types::Value;

const ALIASES: [(&str, &str); 2] = [("{events}", "e"), ("{feeds}", "f")];

/// A composable SQL fragment with positional parameters.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    sql: String,
    params: Vec<Value>,
    has_where: bool,
    order: Option<String>,
    limit: Option<usize>,
}

impl QueryBuilder {
    pub fn new(sql: &str) -> Self {
        let has_where = sql.to_ascii_lowercase().contains("where");
        Self {
            sql: sql.to_string(),
            params: Vec::new(),
            has_where,
            order: None,
            limit: None,
        }
    }

    /// Append a filter clause, prefixing `where` or `and` as appropriate.
    pub fn add_clause(mut self, clause: &str, params: Vec<Value>) -> Self {
        let modifier = if self.has_where { "and" } else { "where" };
        self.sql = format!("{} {} {}", self.sql, modifier, clause);
        self.has_where = true;
        self.params.extend(params);
        self
    }

    /// Concatenate a raw fragment (joins, subqueries) onto the base.
    pub fn append(mut self, fragment: &str) -> Self {
        self.sql.push(' ');
        self.sql.push_str(fragment);
        self.has_where |= fragment.to_ascii_lowercase().contains("where");
        self
    }

    pub fn order_by(mut self, order: &str) -> Self {
        self.order = Some(order.to_string());
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Resolve aliases and attachments into executable SQL.
    pub fn format(&self) -> String {
        let mut sql = self.sql.clone();

        if let Some(order) = &self.order {
            sql = format!("{sql} order by {order}");
        }

        if let Some(limit) = self.limit {
            sql = format!("{sql} limit {limit}");
        }

        for (symbol, alias) in ALIASES {
            sql = sql.replace(symbol, alias);
        }

        sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_clause_uses_where() {
        let q = QueryBuilder::new("select {events}.* from events {events}")
            .add_clause("{events}.title = ?", vec![Value::Text("x".into())]);

        assert_eq!(
            q.format(),
            "select e.* from events e where e.title = ?"
        );
        assert_eq!(q.params().len(), 1);
    }

    #[test]
    fn test_subsequent_clauses_use_and() {
        let q = QueryBuilder::new("select {events}.* from events {events}")
            .add_clause("{events}.title = ?", vec![Value::Text("x".into())])
            .add_clause("{events}.link = ?", vec![Value::Text("y".into())]);

        assert!(q.format().ends_with("where e.title = ? and e.link = ?"));
        assert_eq!(q.params().len(), 2);
    }

    #[test]
    fn test_existing_where_in_base_is_detected() {
        let q = QueryBuilder::new(
            "select {events}.* from events {events}, feeds {feeds} \
             where {events}.feed_id = {feeds}.id",
        )
        .add_clause("{feeds}.short_name = ?", vec![Value::Text("z".into())]);

        assert!(q.format().contains("where e.feed_id = f.id and f.short_name = ?"));
    }

    #[test]
    fn test_order_and_limit_attachments() {
        let q = QueryBuilder::new("select {events}.* from events {events}")
            .order_by("{events}.occurred desc")
            .limit(Some(10));

        assert!(q.format().ends_with("order by e.occurred desc limit 10"));
    }
}
