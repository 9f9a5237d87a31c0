//! Event data model: the unit of work flowing through a pipeline.
//!
//! An event is one check or metric result submitted by an agent. The
//! engine reads it and may produce mutated copies; it never mutates the
//! caller's original in place. Each workflow of a pipeline operates on
//! its own independent clone.

use serde::{Deserialize, Serialize};

use crate::codec::Metrics;

/// The entity (host, proxy, service) an event was observed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity name within its namespace.
    pub name: String,
    /// Namespace the entity belongs to.
    #[serde(default)]
    pub namespace: String,
    /// Subscriptions the entity's agent has registered.
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

/// Result of one check execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Check {
    /// Check name.
    pub name: String,
    /// Exit status: 0 = OK, 1 = warning, 2 = critical, other = unknown.
    #[serde(default)]
    pub status: u32,
    /// Raw check output.
    #[serde(default)]
    pub output: String,
    /// Unix timestamp at which the request was issued.
    #[serde(default)]
    pub issued: i64,
    /// Unix timestamp at which the check ran.
    #[serde(default)]
    pub executed: i64,
    /// Check execution duration in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Subscriptions the check was published to.
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Names of silence entries currently matching this check, as
    /// precomputed by the scheduler. Empty when the event is not silenced.
    #[serde(default)]
    pub silenced: Vec<String>,
}

/// One check/metric result submitted by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unix timestamp at which the event was created.
    #[serde(default)]
    pub timestamp: i64,
    /// Entity the event was observed on.
    pub entity: Entity,
    /// Check result, absent for metric-only events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<Check>,
    /// Metric payload, absent for check-only events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl Event {
    /// Whether the event carries a check result.
    pub fn has_check(&self) -> bool {
        self.check.is_some()
    }

    /// Whether the event carries a metric payload.
    pub fn has_metrics(&self) -> bool {
        self.metrics.is_some()
    }

    /// Whether the event represents a non-OK check result.
    ///
    /// An event without a check is never an incident.
    pub fn is_incident(&self) -> bool {
        self.check.as_ref().is_some_and(|c| c.status != 0)
    }

    /// Whether the event is silenced according to the precomputed
    /// silence-entry names attached to its check.
    pub fn is_silenced(&self) -> bool {
        self.check.as_ref().is_some_and(|c| !c.silenced.is_empty())
    }

    /// All subscriptions the event can be matched against: the check's
    /// plus the entity's, including the implicit `entity:<name>`
    /// subscription every agent registers for itself.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut subs: Vec<String> = self
            .check
            .iter()
            .flat_map(|c| c.subscriptions.iter().cloned())
            .chain(self.entity.subscriptions.iter().cloned())
            .collect();
        subs.push(format!("entity:{}", self.entity.name));
        subs
    }

    /// Build a minimal OK event for the given entity and check names.
    ///
    /// Used by tests and embedders that need a well-formed event without
    /// hand-assembling every field.
    pub fn fixture(entity_name: &str, check_name: &str) -> Self {
        Self {
            timestamp: 0,
            entity: Entity {
                name: entity_name.to_string(),
                namespace: "default".to_string(),
                subscriptions: vec!["linux".to_string()],
            },
            check: Some(Check {
                name: check_name.to_string(),
                status: 0,
                output: String::new(),
                issued: 0,
                executed: 0,
                duration: 0.0,
                subscriptions: vec!["linux".to_string()],
                silenced: Vec::new(),
            }),
            metrics: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_is_well_formed() {
        let event = Event::fixture("server-01", "check_cpu");
        assert_eq!(event.entity.name, "server-01");
        assert_eq!(event.check.as_ref().unwrap().name, "check_cpu");
        assert!(event.has_check());
        assert!(!event.has_metrics());
        assert!(!event.is_incident());
        assert!(!event.is_silenced());
    }

    #[test]
    fn is_incident_reflects_check_status() {
        let mut event = Event::fixture("server-01", "check_cpu");
        assert!(!event.is_incident());

        event.check.as_mut().unwrap().status = 2;
        assert!(event.is_incident());

        event.check = None;
        assert!(!event.is_incident());
    }

    #[test]
    fn is_silenced_reflects_precomputed_entries() {
        let mut event = Event::fixture("server-01", "check_cpu");
        assert!(!event.is_silenced());

        event.check.as_mut().unwrap().silenced = vec!["linux:check_cpu".to_string()];
        assert!(event.is_silenced());
    }

    #[test]
    fn has_metrics_reflects_payload() {
        let mut event = Event::fixture("server-01", "check_cpu");
        assert!(!event.has_metrics());

        event.metrics = Some(Metrics::default());
        assert!(event.has_metrics());
    }

    #[test]
    fn subscriptions_include_implicit_entity_subscription() {
        let event = Event::fixture("server-01", "check_cpu");
        let subs = event.subscriptions();
        assert!(subs.contains(&"linux".to_string()));
        assert!(subs.contains(&"entity:server-01".to_string()));
    }

    #[test]
    fn event_serializes_to_json() {
        let event = Event::fixture("server-01", "check_cpu");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["entity"]["name"], "server-01");
        assert_eq!(value["check"]["name"], "check_cpu");
        // Absent metrics are omitted entirely, not serialized as null.
        assert!(value.get("metrics").is_none());
    }

    #[test]
    fn clone_is_deep() {
        let mut original = Event::fixture("server-01", "check_cpu");
        let copied = original.clone();

        original.check.as_mut().unwrap().output = "mutated".to_string();
        assert_eq!(copied.check.as_ref().unwrap().output, "");
    }
}
