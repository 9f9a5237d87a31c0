//! Mutator stage: optional transform of the event before handler
//! dispatch.
//!
//! Mirrors the filter adapter set: a [`MutatorAdapter`] declares which
//! references it services, and the [`MutatorRegistry`] resolves a
//! workflow's mutator reference to the unique willing adapter. Mutation
//! is copy-on-write: adapters return a fresh event and never alias the
//! input's sub-structures, so a failed attempt can not leak partially
//! mutated state into later stages. On error the owning workflow is
//! aborted before any handler dispatch; retry policy belongs to the
//! external scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{context, Environment, UndefinedBehavior};

use crate::error::{MutateError, ResolveError};
use crate::event::Event;
use crate::resource::{
    MutatorDef, MutatorKind, ResourceProvider, ResourceReference, API_CORE_V2, TYPE_MUTATOR,
};

/// A pluggable event-mutator implementation.
#[async_trait]
pub trait MutatorAdapter: Send + Sync {
    /// Stable adapter identifier used in diagnostics.
    fn name(&self) -> &str;

    /// Whether this adapter is willing to service the given reference.
    fn can_mutate(&self, reference: &ResourceReference) -> bool;

    /// Transform the event, returning a new value.
    async fn mutate(
        &self,
        reference: &ResourceReference,
        event: &Event,
    ) -> Result<Event, MutateError>;
}

impl std::fmt::Debug for dyn MutatorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutatorAdapter")
            .field("name", &self.name())
            .finish()
    }
}

/// Registry resolving mutator references to the unique willing adapter.
#[derive(Debug, Default)]
pub struct MutatorRegistry {
    adapters: Vec<Arc<dyn MutatorAdapter>>,
}

impl MutatorRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Registry preloaded with the built-in template mutator.
    pub fn with_builtins(provider: Arc<dyn ResourceProvider>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TemplateMutatorAdapter::new(provider)));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn MutatorAdapter>) {
        tracing::debug!(adapter = %adapter.name(), "Registered mutator adapter");
        self.adapters.push(adapter);
    }

    /// Resolve a reference to the single adapter willing to service it.
    pub fn resolve(
        &self,
        reference: &ResourceReference,
    ) -> Result<Arc<dyn MutatorAdapter>, ResolveError> {
        let candidates: Vec<&Arc<dyn MutatorAdapter>> = self
            .adapters
            .iter()
            .filter(|adapter| adapter.can_mutate(reference))
            .collect();

        match candidates.as_slice() {
            [] => Err(ResolveError::UnknownReference {
                reference: reference.to_string(),
            }),
            [adapter] => Ok(Arc::clone(*adapter)),
            many => Err(ResolveError::Ambiguous {
                reference: reference.to_string(),
                candidates: many.iter().map(|a| a.name().to_string()).collect(),
            }),
        }
    }
}

/// Built-in mutator servicing every `core/v2` Mutator reference.
///
/// Loads the definition from the resource provider. The `identity`
/// kind returns a plain copy; the `template` kind renders a template
/// against the event (exposed as the `event` variable) into the copy's
/// check output.
pub struct TemplateMutatorAdapter {
    provider: Arc<dyn ResourceProvider>,
}

impl TemplateMutatorAdapter {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }

    fn apply(def: &MutatorDef, event: &Event) -> Result<Event, MutateError> {
        match &def.kind {
            MutatorKind::Identity => Ok(event.clone()),
            MutatorKind::Template { template } => {
                let mut env = Environment::new();
                env.set_undefined_behavior(UndefinedBehavior::Lenient);
                env.add_template("mutator", template)
                    .map_err(|e| MutateError::Failed {
                        mutator: def.name.clone(),
                        message: e.to_string(),
                    })?;
                let rendered = env
                    .get_template("mutator")
                    .and_then(|t| t.render(context! { event => event }))
                    .map_err(|e| MutateError::Failed {
                        mutator: def.name.clone(),
                        message: e.to_string(),
                    })?;

                let mut mutated = event.clone();
                match mutated.check.as_mut() {
                    Some(check) => check.output = rendered,
                    None => {
                        return Err(MutateError::Failed {
                            mutator: def.name.clone(),
                            message: "event has no check output to rewrite".to_string(),
                        })
                    }
                }
                Ok(mutated)
            }
        }
    }
}

impl std::fmt::Debug for TemplateMutatorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateMutatorAdapter").finish()
    }
}

#[async_trait]
impl MutatorAdapter for TemplateMutatorAdapter {
    fn name(&self) -> &str {
        "TemplateMutatorAdapter"
    }

    fn can_mutate(&self, reference: &ResourceReference) -> bool {
        reference.api_version == API_CORE_V2 && reference.type_ == TYPE_MUTATOR
    }

    async fn mutate(
        &self,
        reference: &ResourceReference,
        event: &Event,
    ) -> Result<Event, MutateError> {
        let def = self.provider.get_mutator(reference).await.ok_or_else(|| {
            MutateError::Resolve(ResolveError::UnknownReference {
                reference: reference.to_string(),
            })
        })?;

        Self::apply(&def, event).inspect_err(|e| {
            metrics::counter!(
                "eventflow_mutator_errors_total",
                "mutator" => def.name.clone()
            )
            .increment(1);
            tracing::warn!(mutator = %def.name, error = %e, "Mutation failed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryProvider;

    fn make_adapter(defs: Vec<MutatorDef>) -> TemplateMutatorAdapter {
        let mut provider = MemoryProvider::new();
        for def in defs {
            provider.add_mutator(def);
        }
        TemplateMutatorAdapter::new(Arc::new(provider))
    }

    #[test]
    fn claims_any_core_mutator_reference() {
        let adapter = make_adapter(vec![]);
        assert!(adapter.can_mutate(&ResourceReference::mutator("anything")));
        assert!(!adapter.can_mutate(&ResourceReference::event_filter("anything")));
    }

    #[tokio::test]
    async fn identity_mutator_returns_equal_copy() {
        let adapter = make_adapter(vec![MutatorDef {
            name: "noop".to_string(),
            kind: MutatorKind::Identity,
        }]);

        let event = Event::fixture("server-01", "check_cpu");
        let mutated = adapter
            .mutate(&ResourceReference::mutator("noop"), &event)
            .await
            .unwrap();
        assert_eq!(mutated, event);
    }

    #[tokio::test]
    async fn template_mutator_rewrites_check_output() {
        let adapter = make_adapter(vec![MutatorDef {
            name: "summarize".to_string(),
            kind: MutatorKind::Template {
                template: "{{ event.check.name }} on {{ event.entity.name }}".to_string(),
            },
        }]);

        let event = Event::fixture("server-01", "check_cpu");
        let mutated = adapter
            .mutate(&ResourceReference::mutator("summarize"), &event)
            .await
            .unwrap();

        assert_eq!(
            mutated.check.as_ref().unwrap().output,
            "check_cpu on server-01"
        );
        // The input event is untouched.
        assert_eq!(event.check.as_ref().unwrap().output, "");
    }

    #[tokio::test]
    async fn template_mutator_fails_on_checkless_event() {
        let adapter = make_adapter(vec![MutatorDef {
            name: "summarize".to_string(),
            kind: MutatorKind::Template {
                template: "{{ event.entity.name }}".to_string(),
            },
        }]);

        let mut event = Event::fixture("server-01", "check_cpu");
        event.check = None;

        let result = adapter
            .mutate(&ResourceReference::mutator("summarize"), &event)
            .await;
        assert!(matches!(result, Err(MutateError::Failed { .. })));
    }

    #[tokio::test]
    async fn invalid_template_syntax_fails() {
        let adapter = make_adapter(vec![MutatorDef {
            name: "broken".to_string(),
            kind: MutatorKind::Template {
                template: "{{ event.check.name".to_string(),
            },
        }]);

        let event = Event::fixture("server-01", "check_cpu");
        let result = adapter
            .mutate(&ResourceReference::mutator("broken"), &event)
            .await;
        match result {
            Err(MutateError::Failed { mutator, .. }) => assert_eq!(mutator, "broken"),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_definition_is_an_unknown_reference() {
        let adapter = make_adapter(vec![]);
        let event = Event::fixture("server-01", "check_cpu");

        let result = adapter
            .mutate(&ResourceReference::mutator("vanished"), &event)
            .await;
        assert!(matches!(
            result,
            Err(MutateError::Resolve(ResolveError::UnknownReference { .. }))
        ));
    }

    #[test]
    fn registry_resolves_builtin_for_any_mutator_reference() {
        let registry = MutatorRegistry::with_builtins(Arc::new(MemoryProvider::new()));
        let adapter = registry
            .resolve(&ResourceReference::mutator("whatever"))
            .unwrap();
        assert_eq!(adapter.name(), "TemplateMutatorAdapter");

        let err = registry
            .resolve(&ResourceReference::event_filter("whatever"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownReference { .. }));
    }
}
