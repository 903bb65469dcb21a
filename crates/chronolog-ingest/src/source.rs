//! The feed source capability contract.
//!
//! One [`FeedSource`] implementation exists per upstream service. The engine
//! only sees this trait: sources declare their pacing and dedup properties,
//! build the initial request, turn response bodies into events and the next
//! request, and may hook protocol-level recovery (token refresh) via
//! [`FeedSource::parse_status`]. Optional reconciliation hooks report
//! [`Capability::Unsupported`] instead of raising, so callers can branch on
//! a typed result.

use crate::error::{Error, Result};
use chronolog_core::{Event, FeedInfo, Field};
use reqwest::StatusCode;

/// An upstream HTTP request: url plus headers.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

/// What a source extracted from one response body.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// Events in the order the source emitted them.
    pub events: Vec<Event>,
    /// The next page's request, or `None` when pagination is exhausted.
    pub next: Option<FetchRequest>,
}

/// Verdict from a source's status hook.
#[derive(Debug, Clone)]
pub enum StatusAction {
    /// The response is usable; parse it.
    Proceed,
    /// Retry the same request, optionally redirected / re-authenticated.
    Retry {
        url: Option<String>,
        headers: Option<Vec<(String, String)>>,
    },
}

/// Result of an optional source capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability<T> {
    Supported(T),
    Unsupported,
}

/// Parameters for one fetch run.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    /// Consume every page instead of stopping at the incremental boundary.
    pub all: bool,
    /// Pace requests at the source's declared rate limit.
    pub rate_limit: bool,
    /// Newest `occurred` already present in the store, for time-keyed feeds.
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    /// Last known key-field value, for non-time-keyed feeds.
    pub last_key: Option<String>,
}

/// Capability contract implemented once per upstream service.
pub trait FeedSource: Send + Sync {
    /// The owning feed's public metadata, embedded into produced events.
    fn info(&self) -> &FeedInfo;

    /// Attribute used to detect already-ingested events.
    fn key_field(&self) -> Field {
        Field::Occurred
    }

    /// Whether near-simultaneous events are clustered.
    fn grouped(&self) -> bool {
        false
    }

    /// Clustering window in seconds.
    fn grouped_window(&self) -> i64 {
        0
    }

    /// Maximum requests per second when pacing is requested.
    fn rate_limit(&self) -> f64 {
        1.0
    }

    /// Build the initial request.
    fn init_params(&self, ctx: &FetchContext) -> Result<FetchRequest>;

    /// Turn a decoded response body into events and the next request.
    fn parse(&self, body: &serde_json::Value) -> Result<ParseOutcome>;

    /// Turn one raw item into an [`Event`].
    fn to_event(&self, raw: serde_json::Value) -> Result<Event>;

    /// Inspect the response status before parsing. The default treats any
    /// non-success status as fatal; sources with recoverable protocols
    /// (expired tokens, rotating endpoints) return [`StatusAction::Retry`].
    fn parse_status(
        &self,
        status: StatusCode,
        _body: &[u8],
        request: &FetchRequest,
    ) -> Result<StatusAction> {
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        Ok(StatusAction::Proceed)
    }

    /// Best-effort lookup of a previously-unlinked item.
    fn deep_search(&self, _event: &Event, _existing: &[Event]) -> Capability<Option<Event>> {
        Capability::Unsupported
    }

    /// Best-effort reconciliation of items missing from the store.
    fn find_missing(&self, _missing: &[Event]) -> Capability<Vec<Event>> {
        Capability::Unsupported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct Minimal {
        info: FeedInfo,
    }

    impl FeedSource for Minimal {
        fn info(&self) -> &FeedInfo {
            &self.info
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

    fn minimal() -> Minimal {
        Minimal {
            info: FeedInfo {
                id: "feed-1".to_string(),
                short_name: "minimal".to_string(),
                full_name: "Minimal".to_string(),
                color: "000000".to_string(),
                favicon: None,
            },
        }
    }

    #[test]
    fn test_defaults() {
        let source = minimal();
        assert_eq!(source.key_field(), Field::Occurred);
        assert!(!source.grouped());
        assert_eq!(source.rate_limit(), 1.0);
    }

    #[test]
    fn test_default_status_hook_rejects_failure() {
        let source = minimal();
        let request = FetchRequest::new("https://example.com/feed");

        let result = source.parse_status(StatusCode::FORBIDDEN, b"", &request);
        assert!(matches!(
            result,
            Err(Error::HttpStatus { status: 403, .. })
        ));

        assert!(matches!(
            source.parse_status(StatusCode::OK, b"", &request),
            Ok(StatusAction::Proceed)
        ));
    }

    #[test]
    fn test_optional_hooks_report_unsupported() {
        let source = minimal();
        let event = Event::new(Utc::now());

        assert_eq!(source.deep_search(&event, &[]), Capability::Unsupported);
        assert_eq!(source.find_missing(&[]), Capability::Unsupported);
    }
}
