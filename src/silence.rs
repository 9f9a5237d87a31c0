//! Silencing resolver: decides whether an event is currently silenced.
//!
//! Two evaluation modes are supported, because either the scheduler or
//! the pipeline may be the point of truth depending on deployment:
//!
//! - **Precomputed**: trust the silence-entry names already attached to
//!   the event's check by the ingestion path.
//! - **Recompute**: match the event against the raw active silence-entry
//!   set. The match is a pure existential predicate over subscription and
//!   check-name patterns plus the entry's time window; the result never
//!   depends on the iteration order of the set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Wildcard matching any subscription or check name.
pub const WILDCARD: &str = "*";

/// A time-bounded suppression rule matched against subscription and
/// check name.
///
/// Entries are created and expired by the management surface; the
/// resolver consumes them read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceEntry {
    /// Subscription pattern, `*` to match any.
    pub subscription: String,
    /// Check-name pattern, `*` to match any.
    pub check: String,
    /// Start of the suppression window; entry is active immediately
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<DateTime<Utc>>,
    /// End of the suppression window; entry never expires by time
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
    /// Who created the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Why the entry was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SilenceEntry {
    /// Entry matching every check on the given subscription.
    pub fn for_subscription(subscription: &str) -> Self {
        Self::new(subscription, WILDCARD)
    }

    /// Entry matching the given check on every subscription.
    pub fn for_check(check: &str) -> Self {
        Self::new(WILDCARD, check)
    }

    pub fn new(subscription: &str, check: &str) -> Self {
        Self {
            subscription: subscription.to_string(),
            check: check.to_string(),
            begin: None,
            expire_at: None,
            creator: None,
            reason: None,
        }
    }

    /// The entry's canonical name, `<subscription>:<check>`.
    pub fn canonical_name(&self) -> String {
        format!("{}:{}", self.subscription, self.check)
    }

    /// Whether the entry's time window contains `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if let Some(begin) = self.begin {
            if now < begin {
                return false;
            }
        }
        if let Some(expire_at) = self.expire_at {
            if now >= expire_at {
                return false;
            }
        }
        true
    }

    /// Whether the entry matches the given subscriptions and check name
    /// at `now`.
    fn matches(&self, subscriptions: &[String], check_name: &str, now: DateTime<Utc>) -> bool {
        if !self.is_active(now) {
            return false;
        }
        let subscription_match = self.subscription == WILDCARD
            || subscriptions.iter().any(|s| *s == self.subscription);
        let check_match = self.check == WILDCARD || self.check == check_name;
        subscription_match && check_match
    }
}

/// Precomputed mode: whether the ingestion path already attached
/// matching silence-entry names to the event.
pub fn is_silenced(event: &Event) -> bool {
    event.is_silenced()
}

/// Recompute mode: canonical names of the active entries matching the
/// event, sorted so the result is independent of the entry set's order.
///
/// Events without a check cannot be silenced and match nothing.
pub fn matching_entries(
    event: &Event,
    entries: &[SilenceEntry],
    now: DateTime<Utc>,
) -> Vec<String> {
    let Some(check) = &event.check else {
        return Vec::new();
    };
    let subscriptions = event.subscriptions();
    let mut names: Vec<String> = entries
        .iter()
        .filter(|entry| entry.matches(&subscriptions, &check.name, now))
        .map(SilenceEntry::canonical_name)
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Recompute mode, boolean form: whether at least one active entry
/// matches the event.
pub fn is_silenced_by(event: &Event, entries: &[SilenceEntry], now: DateTime<Utc>) -> bool {
    !matching_entries(event, entries, now).is_empty()
}
