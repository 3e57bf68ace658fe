//! Per-sender throttle ledger.
//!
//! In-process state only: one entry per sender account, owned by the
//! scheduler and passed around explicitly. Window rollover is lazy — an
//! idle sender's entry is rolled forward the next time it is considered,
//! never proactively. If several scheduler processes run against the
//! same Registry the ledger cannot prevent double-sends; run one.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::ThrottleConfig;

fn start_of_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(t)
}

fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(86_400), 0).unwrap_or(t)
}

/// Throttle state for one sender account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub next_eligible: DateTime<Utc>,
    pub count_this_hour: u32,
    pub count_this_day: u32,
    pub hour_start: DateTime<Utc>,
    pub day_start: DateTime<Utc>,
}

impl LedgerEntry {
    /// A fresh entry: immediately eligible, zero counts, windows anchored
    /// at the current natural hour/day.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            next_eligible: DateTime::UNIX_EPOCH,
            count_this_hour: 0,
            count_this_day: 0,
            hour_start: start_of_hour(now),
            day_start: start_of_day(now),
        }
    }

    /// Pure state transition: roll counters forward across natural
    /// hour/day boundaries and report eligibility. A sender is eligible
    /// iff `now` has reached `next_eligible` and both counters are under
    /// their caps.
    pub fn roll(mut self, now: DateTime<Utc>, max_per_hour: u32, max_per_day: u32) -> (Self, bool) {
        let hour0 = start_of_hour(now);
        let day0 = start_of_day(now);
        if hour0 > self.hour_start {
            self.count_this_hour = 0;
            self.hour_start = hour0;
        }
        if day0 > self.day_start {
            self.count_this_day = 0;
            self.day_start = day0;
        }
        let under_caps =
            self.count_this_hour < max_per_hour && self.count_this_day < max_per_day;
        let eligible = under_caps && now >= self.next_eligible;
        (self, eligible)
    }

    /// Account for a successful send: bump both counters and schedule the
    /// next eligible instant with uniform jitter. Randomized spacing is
    /// deliberate — it keeps senders out of lockstep.
    pub fn record_send<R: Rng>(
        &mut self,
        now: DateTime<Utc>,
        throttle: &ThrottleConfig,
        rng: &mut R,
    ) {
        self.count_this_hour += 1;
        self.count_this_day += 1;
        let min = throttle.min_interval.as_millis() as i64;
        let max = throttle.max_interval.as_millis() as i64;
        let jitter_ms = if max > min { rng.gen_range(min..=max) } else { min };
        self.next_eligible = now + chrono::Duration::milliseconds(jitter_ms);
    }
}

/// The sender → entry map.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: HashMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roll the sender's entry (creating one on first sight) and report
    /// whether it may send now.
    pub fn roll(&mut self, sender: &str, now: DateTime<Utc>, throttle: &ThrottleConfig) -> bool {
        let entry = self
            .entries
            .get(sender)
            .copied()
            .unwrap_or_else(|| LedgerEntry::new(now));
        let (rolled, eligible) = entry.roll(now, throttle.max_per_hour, throttle.max_per_day);
        self.entries.insert(sender.to_string(), rolled);
        eligible
    }

    pub fn record_send<R: Rng>(
        &mut self,
        sender: &str,
        now: DateTime<Utc>,
        throttle: &ThrottleConfig,
        rng: &mut R,
    ) {
        let entry = self
            .entries
            .entry(sender.to_string())
            .or_insert_with(|| LedgerEntry::new(now));
        entry.record_send(now, throttle, rng);
    }

    pub fn get(&self, sender: &str) -> Option<&LedgerEntry> {
        self.entries.get(sender)
    }

    /// Shortest positive wait until some of the given senders becomes
    /// time-eligible. `None` when no future instant is scheduled.
    pub fn shortest_wait<'a>(
        &self,
        now: DateTime<Utc>,
        senders: impl Iterator<Item = &'a str>,
    ) -> Option<Duration> {
        senders
            .filter_map(|sender| self.entries.get(sender))
            .filter_map(|entry| (entry.next_eligible - now).to_std().ok())
            .filter(|wait| !wait.is_zero())
            .min()
    }
}
