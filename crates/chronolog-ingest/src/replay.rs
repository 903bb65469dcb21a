//! Dump replay for backfills.
//!
//! Re-feeds a JSONL dump (one upstream response body per line) through a
//! source's parse hook, producing occurred-ascending events without any
//! HTTP traffic. Useful for seeding a fresh store from an archived capture.

use crate::error::Result;
use crate::source::FeedSource;
use chronolog_core::Event;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Parse every line of `path` through the source and return the events in
/// ascending `occurred` order.
pub fn replay(source: &dyn FeedSource, path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path)?;
    let mut events = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let body: serde_json::Value = serde_json::from_str(&line)?;
        let outcome = source.parse(&body)?;
        events.extend(outcome.events);
    }

    events.sort_by(|a, b| a.occurred.cmp(&b.occurred).then_with(|| a.id.cmp(&b.id)));

    info!(events = events.len(), "events loaded from dump");

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FetchContext, FetchRequest, ParseOutcome};
    use chrono::{DateTime, TimeZone, Utc};
    use chronolog_core::FeedInfo;
    use std::io::Write;

    struct DumpSource {
        info: FeedInfo,
    }

    impl FeedSource for DumpSource {
        fn info(&self) -> &FeedInfo {
            &self.info
        }

        fn init_params(&self, _ctx: &FetchContext) -> Result<FetchRequest> {
            Ok(FetchRequest::new("https://example.com/feed"))
        }

        fn parse(&self, body: &serde_json::Value) -> Result<ParseOutcome> {
            let events = body["items"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|item| self.to_event(item.clone()))
                        .collect::<Result<Vec<_>>>()
                })
                .transpose()?
                .unwrap_or_default();

            Ok(ParseOutcome {
                events,
                next: None,
            })
        }

        fn to_event(&self, raw: serde_json::Value) -> Result<Event> {
            let occurred: DateTime<Utc> = Utc
                .timestamp_opt(raw["at"].as_i64().unwrap_or_default(), 0)
                .unwrap();
            let mut event = Event::new(occurred);
            event.feed = Some(self.info.clone());
            event.raw = Some(raw);
            Ok(event)
        }
    }

    #[test]
    fn test_replay_sorts_ascending() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dump.jsonl");

        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"items": [{{"at": 300}}, {{"at": 100}}]}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"items": [{{"at": 200}}]}}"#).unwrap();

        let source = DumpSource {
            info: FeedInfo {
                id: "feed-1".to_string(),
                short_name: "dump".to_string(),
                full_name: "Dump".to_string(),
                color: "000000".to_string(),
                favicon: None,
            },
        };

        let events = replay(&source, &path).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].occurred <= w[1].occurred));
    }
}
