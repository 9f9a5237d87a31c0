//! Resource definitions consumed by the pipeline engine.
//!
//! Pipelines, filters, mutators and handlers are owned by an external
//! configuration store; the engine holds request-scoped references to
//! them for the duration of one event's processing. The store is
//! abstracted behind the read-only [`ResourceProvider`] trait, with an
//! in-memory implementation for tests and embedders.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::silence::SilenceEntry;

/// API group shared by all core resources.
pub const API_CORE_V2: &str = "core/v2";
/// Resource type of event filters.
pub const TYPE_EVENT_FILTER: &str = "EventFilter";
/// Resource type of mutators.
pub const TYPE_MUTATOR: &str = "Mutator";
/// Resource type of handlers.
pub const TYPE_HANDLER: &str = "Handler";

/// A typed, named reference identifying a filter, mutator or handler.
///
/// Equality is by value. References are used both for definition lookup
/// and for adapter dispatch: an adapter declares which references it is
/// willing to service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceReference {
    /// API group and version, e.g. `core/v2`.
    pub api_version: String,
    /// Resource kind, e.g. `EventFilter`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Resource name.
    pub name: String,
}

impl ResourceReference {
    pub fn new(api_version: &str, type_: &str, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            type_: type_.to_string(),
            name: name.to_string(),
        }
    }

    /// Reference to a `core/v2` event filter.
    pub fn event_filter(name: &str) -> Self {
        Self::new(API_CORE_V2, TYPE_EVENT_FILTER, name)
    }

    /// Reference to a `core/v2` mutator.
    pub fn mutator(name: &str) -> Self {
        Self::new(API_CORE_V2, TYPE_MUTATOR, name)
    }

    /// Reference to a `core/v2` handler.
    pub fn handler(name: &str) -> Self {
        Self::new(API_CORE_V2, TYPE_HANDLER, name)
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.api_version, self.type_, self.name)
    }
}

/// One filter-chain → mutator → handler unit within a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name, unique within its pipeline.
    pub name: String,
    /// Filter references, evaluated in order with deny short-circuit.
    #[serde(default)]
    pub filters: Vec<ResourceReference>,
    /// At most one mutator applied after filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutator: Option<ResourceReference>,
    /// Handler receiving the (possibly mutated) event.
    pub handler: ResourceReference,
}

/// A named, ordered list of workflows applied to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

/// Whether a filter's expressions admit or reject matching events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    /// The event proceeds only if every expression is true.
    Allow,
    /// The event is rejected if every expression is true.
    Deny,
}

/// Definition of a user-configured expression filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDef {
    pub name: String,
    pub action: FilterAction,
    /// Boolean expressions evaluated against the event; combined with
    /// AND semantics.
    #[serde(default)]
    pub expressions: Vec<String>,
}

/// How a mutator transforms the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutatorKind {
    /// Return the event unchanged.
    Identity,
    /// Rewrite the check output through a template rendered against
    /// the event.
    Template { template: String },
}

/// Definition of a mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutatorDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: MutatorKind,
}

/// How a handler delivers the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerKind {
    /// Spawn a local executable and feed the event on stdin.
    Pipe {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Write the event to a TCP endpoint.
    Tcp { address: String },
    /// Write the event to a UDP endpoint.
    Udp { address: String },
    /// Fan out to a named group of handlers.
    Set { handlers: Vec<String> },
    /// Delegate to a registered extension executor (e.g. a gRPC-backed
    /// handler owned by the embedder).
    Extension { target: String },
}

/// Definition of a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: HandlerKind,
    /// Dispatch deadline. Falls back to the engine default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Read-only view into the external configuration store.
///
/// Definitions handed back are immutable snapshots for the duration of
/// one event's processing. A definition vanishing between invocations
/// surfaces as an unknown-reference error on the next lookup, never as
/// a crash.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn get_pipeline(&self, name: &str) -> Option<Pipeline>;
    async fn get_filter(&self, reference: &ResourceReference) -> Option<FilterDef>;
    async fn get_mutator(&self, reference: &ResourceReference) -> Option<MutatorDef>;
    async fn get_handler(&self, reference: &ResourceReference) -> Option<HandlerDef>;
    /// Lookup used by set handlers, whose members are referenced by
    /// bare name.
    async fn get_handler_by_name(&self, name: &str) -> Option<HandlerDef>;
    /// Currently active silence entries, for resolvers that recompute
    /// silencing instead of trusting the precomputed event field.
    async fn active_silences(&self) -> Vec<SilenceEntry>;
}

impl std::fmt::Debug for dyn ResourceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProvider").finish()
    }
}

/// HashMap-backed [`ResourceProvider`] for tests and embedders that
/// load definitions upfront.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    pipelines: HashMap<String, Pipeline>,
    filters: HashMap<ResourceReference, FilterDef>,
    mutators: HashMap<ResourceReference, MutatorDef>,
    handlers: HashMap<ResourceReference, HandlerDef>,
    silences: Vec<SilenceEntry>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pipeline(&mut self, pipeline: Pipeline) {
        self.pipelines.insert(pipeline.name.clone(), pipeline);
    }

    pub fn add_filter(&mut self, def: FilterDef) {
        self.filters
            .insert(ResourceReference::event_filter(&def.name), def);
    }

    pub fn add_mutator(&mut self, def: MutatorDef) {
        self.mutators
            .insert(ResourceReference::mutator(&def.name), def);
    }

    pub fn add_handler(&mut self, def: HandlerDef) {
        self.handlers
            .insert(ResourceReference::handler(&def.name), def);
    }

    pub fn add_silence(&mut self, entry: SilenceEntry) {
        self.silences.push(entry);
    }
}

#[async_trait]
impl ResourceProvider for MemoryProvider {
    async fn get_pipeline(&self, name: &str) -> Option<Pipeline> {
        self.pipelines.get(name).cloned()
    }

    async fn get_filter(&self, reference: &ResourceReference) -> Option<FilterDef> {
        self.filters.get(reference).cloned()
    }

    async fn get_mutator(&self, reference: &ResourceReference) -> Option<MutatorDef> {
        self.mutators.get(reference).cloned()
    }

    async fn get_handler(&self, reference: &ResourceReference) -> Option<HandlerDef> {
        self.handlers.get(reference).cloned()
    }

    async fn get_handler_by_name(&self, name: &str) -> Option<HandlerDef> {
        self.handlers.get(&ResourceReference::handler(name)).cloned()
    }

    async fn active_silences(&self) -> Vec<SilenceEntry> {
        self.silences.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_equality_is_by_value() {
        let a = ResourceReference::event_filter("not_silenced");
        let b = ResourceReference::new(API_CORE_V2, TYPE_EVENT_FILTER, "not_silenced");
        assert_eq!(a, b);

        let c = ResourceReference::handler("not_silenced");
        assert_ne!(a, c);
    }

    #[test]
    fn reference_display() {
        let r = ResourceReference::event_filter("is_incident");
        assert_eq!(r.to_string(), "core/v2.EventFilter(is_incident)");
    }

    #[test]
    fn workflow_round_trips_through_json() {
        let workflow = Workflow {
            name: "page-oncall".to_string(),
            filters: vec![
                ResourceReference::event_filter("is_incident"),
                ResourceReference::event_filter("not_silenced"),
            ],
            mutator: Some(ResourceReference::mutator("summarize")),
            handler: ResourceReference::handler("pagerduty"),
        };
        let json = serde_json::to_string(&workflow).unwrap();
        let back: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, workflow);
    }

    #[test]
    fn handler_def_json_tags_kind() {
        let def = HandlerDef {
            name: "tcp_sink".to_string(),
            kind: HandlerKind::Tcp {
                address: "127.0.0.1:4242".to_string(),
            },
            timeout: None,
        };
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["kind"], "tcp");
        assert_eq!(value["address"], "127.0.0.1:4242");
    }

    #[tokio::test]
    async fn memory_provider_lookups() {
        let mut provider = MemoryProvider::new();
        provider.add_filter(FilterDef {
            name: "prod_only".to_string(),
            action: FilterAction::Allow,
            expressions: vec!["event.entity.namespace == 'prod'".to_string()],
        });
        provider.add_handler(HandlerDef {
            name: "sink".to_string(),
            kind: HandlerKind::Udp {
                address: "127.0.0.1:9999".to_string(),
            },
            timeout: Some(Duration::from_secs(5)),
        });

        let found = provider
            .get_filter(&ResourceReference::event_filter("prod_only"))
            .await;
        assert!(found.is_some());

        let missing = provider
            .get_filter(&ResourceReference::event_filter("absent"))
            .await;
        assert!(missing.is_none());

        let by_name = provider.get_handler_by_name("sink").await;
        assert_eq!(by_name.unwrap().name, "sink");

        assert!(provider.get_pipeline("nope").await.is_none());
    }
}
