//! Feed metadata and configuration.
//!
//! A feed is the configuration binding for one upstream source. The public
//! metadata ([`FeedInfo`]) is what gets embedded into events at read time;
//! [`FeedConfig`] additionally carries the flags and per-instance overrides
//! that the store persists.

use serde::{Deserialize, Serialize};

/// Public feed metadata, embedded by value into events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedInfo {
    pub id: String,
    /// Unique external key for the feed.
    pub short_name: String,
    pub full_name: String,
    pub color: String,
    #[serde(default)]
    pub favicon: Option<String>,
}

/// Behavior flags stored per feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFlags {
    /// Visible to unauthenticated callers.
    pub is_public: bool,
    /// Included in ingestion runs.
    pub is_updating: bool,
    /// Indexed for full-text search.
    pub is_searchable: bool,
}

/// Full feed configuration as persisted.
///
/// `overrides` is the only part mutated after creation (e.g. a connector
/// persisting a refreshed token) and is written back through the store's
/// `update_feeds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(flatten)]
    pub info: FeedInfo,
    pub flags: FeedFlags,
    /// Name of the connector implementation bound to this feed.
    pub module: String,
    #[serde(default)]
    pub overrides: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> FeedConfig {
        FeedConfig {
            info: FeedInfo {
                id: "feed-1".to_string(),
                short_name: "examplefeed".to_string(),
                full_name: "Example Feed".to_string(),
                color: "0000ff".to_string(),
                favicon: Some("example.png".to_string()),
            },
            flags: FeedFlags {
                is_public: true,
                is_updating: true,
                is_searchable: false,
            },
            module: "example".to_string(),
            overrides: None,
        }
    }

    #[test]
    fn test_config_serde_round_trip() {
        let mut cfg = config();
        cfg.overrides = Some(json!({"token": "abc"}));

        let encoded = serde_json::to_string(&cfg).unwrap();
        let decoded: FeedConfig = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, cfg);
    }

    #[test]
    fn test_info_is_flattened() {
        let encoded = serde_json::to_value(config()).unwrap();
        assert_eq!(encoded["short_name"], "examplefeed");
        assert!(encoded.get("info").is_none());
    }
}
