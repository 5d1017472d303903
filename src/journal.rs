// Journal: an append-only, date-keyed audit log of handler invocations.
//
// Grounded on `journal/journal.go` (Operation, Add, FetchByDate, CleanOld,
// getCurrentDateString, createKey) and the original's boltdb-backed store,
// generalized here over the [`crate::kv::KvStore`] trait so the concrete
// embedded engine is swappable. Keys are `<RFC3339 timestamp>|<username>`,
// chosen so a lexicographic range scan over the bucket is also a
// chronological scan.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kv::{KvError, KvStore};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("failed to encode operation: {0}")]
    Encode(String),
    #[error("failed to decode operation: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub date: String,
    pub username: String,
    pub ip: String,
    pub uri: String,
    pub session_id: String,
}

/// Full RFC3339 timestamp, the value stamped into `Operation.date` and the
/// date component of the storage key — matching the original's
/// `getCurrentDateString` (`time.Now().UTC().Format(time.RFC3339)`), not a
/// day-only truncation. `SecondsFormat::Secs` with `use_z = true` mirrors
/// `time.RFC3339`'s own second precision and `Z` suffix for UTC.
fn full_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Calendar-day-only rendering, used solely to decide whether `to` in
/// `fetch_by_date` already refers to today (so the window isn't extended).
fn day_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn make_key(date: &str, username: &str) -> Vec<u8> {
    format!("{date}|{username}").into_bytes()
}

pub struct Journal<S: KvStore> {
    store: S,
    bucket: String,
}

impl<S: KvStore> Journal<S> {
    pub fn new(store: S, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Stamps `operation.date` with the current RFC3339 timestamp and writes
    /// it keyed by `date|username`. Two operations by the same user land in
    /// distinct entries unless they fall in the same second, in which case
    /// the second write overwrites the first — the same second-granularity
    /// collision the original's boltdb key carries.
    pub fn add(&self, mut operation: Operation, now: DateTime<Utc>) -> Result<(), JournalError> {
        operation.date = full_timestamp(now);
        let key = make_key(&operation.date, &operation.username);
        let value = bincode::serialize(&operation).map_err(|e| JournalError::Encode(e.to_string()))?;
        self.store.put(&self.bucket, &key, &value)?;
        Ok(())
    }

    pub fn get_all(&self) -> Result<Vec<Operation>, JournalError> {
        let rows = self.store.scan_all(&self.bucket)?;
        rows.into_iter()
            .map(|(_, v)| bincode::deserialize(&v).map_err(|e| JournalError::Decode(e.to_string())))
            .collect()
    }

    /// Range-scans `[from, to]` inclusive. If `to` is "now" the original
    /// does not extend the window; for any earlier `to` it adds a full day
    /// so the end date itself is included (a plain lexicographic range
    /// would otherwise exclude all of that day's keys, since they sort
    /// after `to|`). When `username` is supplied, entries for other users
    /// are filtered out of the scanned range.
    pub fn fetch_by_date(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
        username: Option<&str>,
    ) -> Result<Vec<Operation>, JournalError> {
        let effective_to = if day_string(to) == day_string(now) {
            to
        } else {
            to + Duration::days(1)
        };

        let from_key = format!("{}|", full_timestamp(from)).into_bytes();
        let to_key = format!("{}|\u{10FFFF}", full_timestamp(effective_to)).into_bytes();

        let rows = self.store.range(&self.bucket, &from_key, &to_key)?;
        rows.into_iter()
            .map(|(_, v)| bincode::deserialize::<Operation>(&v).map_err(|e| JournalError::Decode(e.to_string())))
            .filter(|result| match (result, username) {
                (Ok(op), Some(u)) => op.username == u,
                _ => true,
            })
            .collect()
    }

    /// Deletes every entry dated strictly before `cutoff`.
    pub fn clean_old(&self, cutoff: DateTime<Utc>) -> Result<usize, JournalError> {
        let rows = self.store.scan_all(&self.bucket)?;
        let cutoff_date = full_timestamp(cutoff);
        let mut removed = 0;
        for (key, value) in rows {
            let operation: Operation =
                bincode::deserialize(&value).map_err(|e| JournalError::Decode(e.to_string()))?;
            if operation.date < cutoff_date {
                self.store.delete(&self.bucket, &key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemStore;
    use chrono::TimeZone;

    fn journal() -> Journal<MemStore> {
        Journal::new(MemStore::new(), "Operations")
    }

    fn op(username: &str, uri: &str) -> Operation {
        Operation {
            date: String::new(),
            username: username.to_string(),
            ip: "1.2.3.4".to_string(),
            uri: uri.to_string(),
            session_id: "sess-1".to_string(),
        }
    }

    #[test]
    fn add_stamps_full_timestamp_and_is_retrievable() {
        let j = journal();
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        j.add(op("alice", "/api/dns/list"), now).unwrap();
        let all = j.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].date, "2026-07-31T12:00:00Z");
    }

    #[test]
    fn same_day_different_times_are_both_retained() {
        let j = journal();
        let morning = Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap();
        let afternoon = Utc.with_ymd_and_hms(2026, 7, 31, 15, 0, 0).unwrap();
        j.add(op("alice", "/api/dns/list"), morning).unwrap();
        j.add(op("alice", "/api/mysql/list"), afternoon).unwrap();
        let all = j.get_all().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn same_instant_same_user_overwrites() {
        let j = journal();
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap();
        j.add(op("alice", "/api/dns/list"), now).unwrap();
        j.add(op("alice", "/api/mysql/list"), now).unwrap();
        let all = j.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uri, "/api/mysql/list");
    }

    #[test]
    fn fetch_by_date_covers_inclusive_range() {
        let j = journal();
        let day1 = Utc.with_ymd_and_hms(2026, 7, 29, 0, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 7, 30, 0, 0, 0).unwrap();
        let day3 = Utc.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap();
        j.add(op("alice", "/a"), day1).unwrap();
        j.add(op("bob", "/b"), day2).unwrap();
        j.add(op("carol", "/c"), day3).unwrap();

        let results = j.fetch_by_date(day1, day2, day3, None).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn fetch_by_date_filters_by_username() {
        let j = journal();
        let day1 = Utc.with_ymd_and_hms(2026, 7, 29, 0, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 7, 30, 0, 0, 0).unwrap();
        j.add(op("alice", "/a"), day1).unwrap();
        j.add(op("bob", "/b"), day2).unwrap();

        let results = j.fetch_by_date(day1, day2, day2, Some("alice")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].username, "alice");
    }

    #[test]
    fn fetch_by_date_with_to_as_now_does_not_overextend() {
        let j = journal();
        let day1 = Utc.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        j.add(op("alice", "/a"), day1).unwrap();
        j.add(op("bob", "/b"), day2).unwrap();

        let results = j.fetch_by_date(day1, day1, day1, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].username, "alice");
    }

    #[test]
    fn clean_old_removes_entries_before_cutoff() {
        let j = journal();
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap();
        j.add(op("alice", "/a"), old).unwrap();
        j.add(op("bob", "/b"), recent).unwrap();

        let removed = j.clean_old(Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(j.get_all().unwrap().len(), 1);
    }
}
