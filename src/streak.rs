//! Watch-streak persisted state, spec.md §6: one JSON file,
//! `{username: {last_streak_timestamp: epoch_seconds}}`, read at startup
//! and rewritten only when dirty.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Entry {
    last_streak_timestamp: i64,
}

pub struct WatchStreakStore {
    path: String,
    entries: HashMap<String, DateTime<Utc>>,
    dirty: bool,
}

impl WatchStreakStore {
    pub async fn load(path: &str) -> Result<Self> {
        let entries = match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                let raw_map: HashMap<String, Entry> = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing watch-streak file {path}"))?;
                raw_map
                    .into_iter()
                    .filter_map(|(k, v)| {
                        DateTime::from_timestamp(v.last_streak_timestamp, 0).map(|ts| (k, ts))
                    })
                    .collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err).with_context(|| format!("reading watch-streak file {path}")),
        };
        Ok(WatchStreakStore {
            path: path.to_owned(),
            entries,
            dirty: false,
        })
    }

    /// Whether `username` was marked within the last `ttl` (6h cache,
    /// spec.md §4.7's STREAK priority rule).
    pub fn is_within_ttl(&self, username: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.entries.get(username) {
            Some(last) => (now - *last).to_std().map(|d| d < ttl).unwrap_or(true),
            None => false,
        }
    }

    pub fn mark(&mut self, username: &str, now: DateTime<Utc>) {
        self.entries.insert(username.to_owned(), now);
        self.dirty = true;
    }

    pub async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let raw_map: HashMap<&String, Entry> = self
            .entries
            .iter()
            .map(|(k, v)| {
                (
                    k,
                    Entry {
                        last_streak_timestamp: v.timestamp(),
                    },
                )
            })
            .collect();
        let serialized =
            serde_json::to_string_pretty(&raw_map).context("serializing watch-streak cache")?;
        tokio::fs::write(&self.path, serialized)
            .await
            .with_context(|| format!("writing watch-streak file {}", self.path))?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_window_respects_six_hour_cache() {
        let mut store = WatchStreakStore {
            path: "unused".into(),
            entries: HashMap::new(),
            dirty: false,
        };
        let now = Utc::now();
        store.mark("alice", now - chrono::Duration::hours(1));
        assert!(store.is_within_ttl("alice", Duration::from_secs(6 * 3600), now));
        store.mark("bob", now - chrono::Duration::hours(7));
        assert!(!store.is_within_ttl("bob", Duration::from_secs(6 * 3600), now));
        assert!(!store.is_within_ttl("carol", Duration::from_secs(6 * 3600), now));
    }

    #[tokio::test]
    async fn flush_is_a_noop_when_not_dirty() {
        let mut store = WatchStreakStore {
            path: "/nonexistent/path/should/not/be/touched.json".into(),
            entries: HashMap::new(),
            dirty: false,
        };
        assert!(store.flush().await.is_ok());
    }
}
