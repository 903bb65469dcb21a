//! Pagination cursors and pages.
//!
//! A [`Cursor`] is opaque to callers: it is serialized into a single query
//! parameter, round-trips through [`Cursor::parse`], and is never built from
//! raw user values without validation. Keyset cursors encode a UTC
//! `(occurred, id)` pair; search cursors a 1-based page number.

use crate::error::{Error, Result};
use crate::event::Event;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use uuid::Uuid;

/// Timestamp grammar inside a serialized keyset cursor. Always UTC.
const CURSOR_FMT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// An opaque pagination position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Keyset position over the relational store.
    ByTime { occurred: DateTime<Utc>, id: String },
    /// 1-based page number over search hits.
    ByPage(u32),
}

impl Cursor {
    /// Parse a textual cursor.
    ///
    /// Accepts either `"<page>"` or `"<timestamp>,<uuid>"`; anything else is
    /// an [`Error::InvalidCursor`].
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split(',').collect();

        match parts.as_slice() {
            [page] => {
                let page: u32 = page
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidCursor(value.to_string()))?;
                Ok(Cursor::ByPage(page))
            }
            [occurred, id] => {
                let occurred = NaiveDateTime::parse_from_str(occurred, CURSOR_FMT)
                    .map_err(|_| Error::InvalidCursor(value.to_string()))?
                    .and_utc();
                let id = Uuid::parse_str(id)
                    .map_err(|_| Error::InvalidCursor(value.to_string()))?;
                Ok(Cursor::ByTime {
                    occurred,
                    id: id.to_string(),
                })
            }
            _ => Err(Error::InvalidCursor(value.to_string())),
        }
    }

    /// Serialize for transport back to the caller.
    pub fn serialize(&self) -> String {
        match self {
            Cursor::ByPage(page) => page.to_string(),
            Cursor::ByTime { occurred, id } => {
                format!("{},{}", occurred.format(CURSOR_FMT), id)
            }
        }
    }
}

/// One page of events plus the position of the next page, if any.
#[derive(Debug, Clone)]
pub struct Page {
    pub events: Vec<Event>,
    pub next: Option<Cursor>,
    /// Output timezone requested by the caller, applied at render time.
    pub timezone: Option<Tz>,
}

impl Page {
    pub fn new(events: Vec<Event>, next: Option<Cursor>, timezone: Option<Tz>) -> Self {
        Self {
            events,
            next,
            timezone,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Caller-facing JSON: localized events plus the serialized next cursor.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "events": self
                .events
                .iter()
                .map(|e| e.to_json(self.timezone))
                .collect::<Vec<_>>(),
            "next": self.next.as_ref().map(|c| c.serialize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_page_cursor_round_trip() {
        let cursor = Cursor::ByPage(4);
        assert_eq!(Cursor::parse(&cursor.serialize()).unwrap(), cursor);
    }

    #[test]
    fn test_keyset_cursor_round_trip() {
        let cursor = Cursor::ByTime {
            occurred: Utc.with_ymd_and_hms(2024, 3, 1, 16, 20, 5).unwrap(),
            id: Uuid::new_v4().to_string(),
        };
        assert_eq!(Cursor::parse(&cursor.serialize()).unwrap(), cursor);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "a,b,c", "not-a-number", "2024-03-01,xyz"] {
            assert!(matches!(
                Cursor::parse(bad),
                Err(Error::InvalidCursor(_))
            ));
        }
    }

    #[test]
    fn test_parse_validates_uuid_component() {
        let result = Cursor::parse("2024-03-01 16:20:05.000000,not-a-uuid");
        assert!(matches!(result, Err(Error::InvalidCursor(_))));
    }

    #[test]
    fn test_page_json_includes_next() {
        let page = Page::new(Vec::new(), Some(Cursor::ByPage(2)), None);
        let value = page.to_json();
        assert_eq!(value["next"], "2");
        assert!(value["events"].as_array().unwrap().is_empty());
    }
}
