// BruteShield: per-IP brute-force ban tracking.
//
// Grounded on `bruteforce/bruteforce.go` (BruteIP{Timestamp,Attempts}, Check,
// Clean) and on the donor's `knhk-connectors::CircuitBreaker`, whose
// timestamp-comparison state machine this mirrors closely: once banned, a
// record's timestamp keeps refreshing on every check without its attempt
// count advancing further, so a persistently misbehaving IP never ages out
// of its own ban window. That "punishes persistence" property is
// intentional, not a bug to smooth over.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BruteRecord {
    timestamp: i64,
    attempts: u32,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

pub struct BruteShield {
    records: Mutex<HashMap<String, BruteRecord>>,
    block_attempts: u32,
    ban_time: i64,
}

impl BruteShield {
    pub fn new(block_attempts: u32, ban_time: i64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            block_attempts,
            ban_time,
        }
    }

    fn sweep_locked(records: &mut HashMap<String, BruteRecord>, ban_time: i64, now: i64) {
        records.retain(|_, record| record.timestamp + ban_time >= now);
    }

    /// Sweeps expired entries, then looks up `ip`:
    /// - absent: inserts `{now, 1}`, returns `(true, -1)`.
    /// - present and already past the threshold: refreshes the timestamp
    ///   only (attempts do not advance further) and returns
    ///   `(false, ban_time)`.
    /// - otherwise: increments attempts, refreshes the timestamp, returns
    ///   `(true, -1)`.
    pub fn check(&self, ip: &str) -> (bool, i64) {
        let mut records = self.records.lock();
        let now = now_unix();
        Self::sweep_locked(&mut records, self.ban_time, now);

        match records.get_mut(ip) {
            None => {
                records.insert(
                    ip.to_string(),
                    BruteRecord {
                        timestamp: now,
                        attempts: 1,
                    },
                );
                (true, -1)
            }
            Some(record) if record.attempts > self.block_attempts => {
                record.timestamp = now;
                (false, self.ban_time)
            }
            Some(record) => {
                record.attempts += 1;
                record.timestamp = now;
                (true, -1)
            }
        }
    }

    /// Resets the record for `ip` to `{now, 1}`, called on a successful
    /// session lookup so honest clients are not banned by prior failures.
    pub fn clean(&self, ip: &str) {
        self.records.lock().insert(
            ip.to_string(),
            BruteRecord {
                timestamp: now_unix(),
                attempts: 1,
            },
        );
    }

    pub fn is_banned(&self, ip: &str) -> bool {
        self.records
            .lock()
            .get(ip)
            .map(|r| r.attempts > self.block_attempts)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_always_allows() {
        let shield = BruteShield::new(10, 600);
        let (allowed, remaining) = shield.check("1.2.3.4");
        assert!(allowed);
        assert_eq!(remaining, -1);
    }

    #[test]
    fn allows_attempts_up_to_and_including_threshold() {
        let shield = BruteShield::new(3, 600);
        for _ in 0..3 {
            let (allowed, _) = shield.check("1.2.3.4");
            assert!(allowed);
        }
    }

    #[test]
    fn bans_past_threshold() {
        let shield = BruteShield::new(3, 600);
        for _ in 0..3 {
            shield.check("1.2.3.4");
        }
        let (allowed, remaining) = shield.check("1.2.3.4");
        assert!(!allowed);
        assert_eq!(remaining, 600);
        assert!(shield.is_banned("1.2.3.4"));
    }

    #[test]
    fn banned_ip_stays_banned_on_repeated_checks() {
        let shield = BruteShield::new(1, 600);
        shield.check("1.2.3.4");
        shield.check("1.2.3.4");
        let (allowed, remaining) = shield.check("1.2.3.4");
        assert!(!allowed);
        assert_eq!(remaining, 600);
    }

    #[test]
    fn clean_resets_the_record_fresh() {
        let shield = BruteShield::new(1, 600);
        shield.check("1.2.3.4");
        shield.check("1.2.3.4");
        assert!(shield.is_banned("1.2.3.4"));
        shield.clean("1.2.3.4");
        assert!(!shield.is_banned("1.2.3.4"));
    }

    #[test]
    fn expired_ban_is_treated_as_fresh() {
        let shield = BruteShield::new(1, 0);
        shield.check("1.2.3.4");
        shield.check("1.2.3.4");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let (allowed, remaining) = shield.check("1.2.3.4");
        assert!(allowed);
        assert_eq!(remaining, -1);
    }

    #[test]
    fn unknown_ip_is_never_banned() {
        let shield = BruteShield::new(10, 600);
        assert!(!shield.is_banned("8.8.8.8"));
    }

    #[test]
    fn per_ip_records_are_independent() {
        let shield = BruteShield::new(1, 600);
        shield.check("1.1.1.1");
        shield.check("1.1.1.1");
        assert!(shield.is_banned("1.1.1.1"));
        assert!(!shield.is_banned("2.2.2.2"));
    }
}
