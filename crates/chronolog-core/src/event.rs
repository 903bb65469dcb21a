//! The Event data model.
//!
//! An [`Event`] is a single timestamped record pulled from an upstream
//! source. Events may carry up to one level of `related` children: a feed
//! that emits bursts of near-simultaneous records gets those records
//! clustered under one parent at ingestion time. Children never have
//! children of their own.

use crate::error::{Error, Result};
use crate::feed::FeedInfo;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp rendering used in caller-facing JSON, e.g.
/// `2024-03-01 16:20:05.000000+0000`.
pub const DATEFMT: &str = "%Y-%m-%d %H:%M:%S%.6f%z";

/// A stored media reference (thumbnail, original image, archived page).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Path relative to the media root.
    pub path: String,
}

/// An event attribute usable as a per-feed deduplication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Occurred,
    Title,
    Text,
    Link,
}

impl Field {
    /// The relational column name for this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Occurred => "occurred",
            Field::Title => "title",
            Field::Text => "text",
            Field::Link => "link",
        }
    }

    /// Extract this field's value from an event, for key comparisons.
    ///
    /// `Occurred` is rendered with [`DATEFMT`] so that equality against a
    /// stored key value is exact.
    pub fn value_of(&self, event: &Event) -> Option<String> {
        match self {
            Field::Occurred => Some(event.occurred.format(DATEFMT).to_string()),
            Field::Title => event.title.clone(),
            Field::Text => event.text.clone(),
            Field::Link => event.link.clone(),
        }
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "occurred" => Ok(Field::Occurred),
            "title" => Ok(Field::Title),
            "text" => Ok(Field::Text),
            "link" => Ok(Field::Link),
            other => Err(Error::InvalidField(other.to_string())),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single document handed to the search index.
#[derive(Debug, Clone)]
pub struct SearchDoc {
    pub id: String,
    pub feed: String,
    pub title: String,
    pub text: String,
    pub occurred: DateTime<Utc>,
}

/// A timestamped record ingested from a feed.
///
/// `occurred` is always UTC and is the primary ordering key; `id` breaks
/// ties deterministically. The `feed` member holds the owning feed's public
/// metadata embedded by value at read time — it is not a live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub occurred: DateTime<Utc>,
    #[serde(default)]
    pub feed: Option<FeedInfo>,
    /// Opaque payload from the source, preserved for reprocessing.
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
    #[serde(default)]
    pub thumbnail: Option<Media>,
    #[serde(default)]
    pub original: Option<Media>,
    #[serde(default)]
    pub archived: Option<Media>,
    #[serde(default)]
    pub related: Option<Vec<Event>>,

    /// Enrichment inputs set by a connector's parse step; consumed by the
    /// media collaborators, never persisted.
    #[serde(skip)]
    pub thumbnail_url: Option<String>,
    #[serde(skip)]
    pub original_url: Option<String>,
    #[serde(skip)]
    pub archive_url: Option<String>,
}

impl Event {
    /// Create an empty event with a fresh id.
    pub fn new(occurred: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: None,
            text: None,
            link: None,
            occurred,
            feed: None,
            raw: None,
            thumbnail: None,
            original: None,
            archived: None,
            related: None,
            thumbnail_url: None,
            original_url: None,
            archive_url: None,
        }
    }

    /// The deepest related timestamp, or this event's own `occurred` when it
    /// has no children. Grouping windows anchor on this.
    pub fn latest_occurred(&self) -> DateTime<Utc> {
        self.related
            .as_ref()
            .and_then(|children| children.last())
            .map(|child| child.occurred)
            .unwrap_or(self.occurred)
    }

    /// Attach a child event. The child's own `related` list is cleared:
    /// grouping is exactly one level deep.
    pub fn add_related(&mut self, mut child: Event) {
        child.related = None;
        self.related.get_or_insert_with(Vec::new).push(child);
    }

    /// Flatten this event (and any children) into search documents.
    ///
    /// Children index under the parent's feed so a feed-scoped removal
    /// covers the whole cluster.
    pub fn documents(&self) -> Vec<SearchDoc> {
        let feed = self
            .feed
            .as_ref()
            .map(|f| f.short_name.clone())
            .unwrap_or_default();

        let mut docs = vec![SearchDoc {
            id: self.id.clone(),
            feed: feed.clone(),
            title: self.title.clone().unwrap_or_default(),
            text: self.text.clone().unwrap_or_default(),
            occurred: self.occurred,
        }];

        if let Some(children) = &self.related {
            for child in children {
                docs.push(SearchDoc {
                    id: child.id.clone(),
                    feed: feed.clone(),
                    title: child.title.clone().unwrap_or_default(),
                    text: child.text.clone().unwrap_or_default(),
                    occurred: child.occurred,
                });
            }
        }

        docs
    }

    /// Caller-facing JSON, with `occurred` rendered in the given timezone
    /// (UTC when none is provided). Applied recursively to children.
    pub fn to_json(&self, timezone: Option<Tz>) -> serde_json::Value {
        let occurred = match timezone {
            Some(tz) => self.occurred.with_timezone(&tz).format(DATEFMT).to_string(),
            None => self.occurred.format(DATEFMT).to_string(),
        };

        let related = self.related.as_ref().map(|children| {
            children
                .iter()
                .map(|child| child.to_json(timezone))
                .collect::<Vec<_>>()
        });

        json!({
            "id": self.id,
            "title": self.title,
            "text": self.text,
            "link": self.link,
            "occurred": occurred,
            "feed": self.feed,
            "raw": self.raw,
            "thumbnail": self.thumbnail,
            "original": self.original,
            "archived": self.archived,
            "related": related,
        })
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        for (name, value) in [
            ("title", &self.title),
            ("link", &self.link),
            ("text", &self.text),
        ] {
            if let Some(value) = value {
                let trimmed: String = value.chars().take(50).collect();
                parts.push(format!("{name}={trimmed}..."));
            }
        }

        f.write_str(&parts.join(", "))
    }
}
