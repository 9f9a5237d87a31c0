//! Filter adapter set: boolean predicates deciding whether an event
//! proceeds through a workflow.
//!
//! Each adapter is a [`FilterAdapter`] declaring which resource
//! references it is willing to service. The [`FilterRegistry`] resolves
//! a workflow's filter reference to the single willing adapter before
//! any filter executes; zero or multiple claimants are configuration
//! errors surfaced to the owning workflow.
//!
//! Built-in adapters cover the core references (`not_silenced`,
//! `is_incident`, `has_metrics`); every other `core/v2` EventFilter
//! reference is serviced by the expression adapter, which loads the
//! filter definition from the resource provider and evaluates its
//! expressions against the event.

pub mod expression;
pub mod has_metrics;
pub mod is_incident;
pub mod not_silenced;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FilterError, ResolveError};
use crate::event::Event;
use crate::resource::{ResourceProvider, ResourceReference, API_CORE_V2, TYPE_EVENT_FILTER};

pub use expression::ExpressionAdapter;
pub use has_metrics::HasMetricsAdapter;
pub use is_incident::IsIncidentAdapter;
pub use not_silenced::NotSilencedAdapter;

/// Names of the built-in filters, claimed by dedicated adapters and
/// therefore off-limits to the expression adapter.
pub const BUILTIN_FILTER_NAMES: [&str; 3] = ["not_silenced", "is_incident", "has_metrics"];

/// Whether a reference points at a `core/v2` event filter.
pub(crate) fn is_core_event_filter(reference: &ResourceReference) -> bool {
    reference.api_version == API_CORE_V2 && reference.type_ == TYPE_EVENT_FILTER
}

/// A pluggable event-filter implementation.
///
/// Implementations must be `Send + Sync` to work across async tasks.
#[async_trait]
pub trait FilterAdapter: Send + Sync {
    /// Stable adapter identifier used in diagnostics.
    fn name(&self) -> &str;

    /// Whether this adapter is willing to service the given reference.
    fn can_filter(&self, reference: &ResourceReference) -> bool;

    /// Evaluate the filter. Returns `true` when the event must be
    /// denied from proceeding through the owning workflow.
    async fn filter(
        &self,
        reference: &ResourceReference,
        event: &Event,
    ) -> Result<bool, FilterError>;
}

impl std::fmt::Debug for dyn FilterAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterAdapter")
            .field("name", &self.name())
            .finish()
    }
}

/// Registry resolving filter references to the unique willing adapter.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    adapters: Vec<Arc<dyn FilterAdapter>>,
}

impl FilterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Registry preloaded with the built-in adapters. The provider is
    /// handed to the expression adapter for definition lookup.
    pub fn with_builtins(provider: Arc<dyn ResourceProvider>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NotSilencedAdapter));
        registry.register(Arc::new(IsIncidentAdapter));
        registry.register(Arc::new(HasMetricsAdapter));
        registry.register(Arc::new(ExpressionAdapter::new(provider)));
        registry
    }

    /// Register an additional adapter. Overlapping claims are not
    /// rejected here; they surface as ambiguity at resolution time.
    pub fn register(&mut self, adapter: Arc<dyn FilterAdapter>) {
        tracing::debug!(adapter = %adapter.name(), "Registered filter adapter");
        self.adapters.push(adapter);
    }

    /// Resolve a reference to the single adapter willing to service it.
    ///
    /// Zero claimants means the reference is unknown; more than one is
    /// an ambiguous configuration. Both are detected before any filter
    /// executes.
    pub fn resolve(
        &self,
        reference: &ResourceReference,
    ) -> Result<Arc<dyn FilterAdapter>, ResolveError> {
        let candidates: Vec<&Arc<dyn FilterAdapter>> = self
            .adapters
            .iter()
            .filter(|adapter| adapter.can_filter(reference))
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

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryProvider;

    struct StaticAdapter {
        name: &'static str,
        claims: &'static str,
        deny: bool,
    }

    #[async_trait]
    impl FilterAdapter for StaticAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn can_filter(&self, reference: &ResourceReference) -> bool {
            is_core_event_filter(reference) && reference.name == self.claims
        }

        async fn filter(
            &self,
            _reference: &ResourceReference,
            _event: &Event,
        ) -> Result<bool, FilterError> {
            Ok(self.deny)
        }
    }

    #[test]
    fn resolve_picks_unique_claimant() {
        let mut registry = FilterRegistry::new();
        registry.register(Arc::new(StaticAdapter {
            name: "A",
            claims: "alpha",
            deny: false,
        }));
        registry.register(Arc::new(StaticAdapter {
            name: "B",
            claims: "beta",
            deny: false,
        }));

        let adapter = registry
            .resolve(&ResourceReference::event_filter("beta"))
            .unwrap();
        assert_eq!(adapter.name(), "B");
    }

    #[test]
    fn resolve_unknown_reference_errors() {
        let registry = FilterRegistry::new();
        let err = registry
            .resolve(&ResourceReference::event_filter("ghost"))
            .unwrap_err();
        match err {
            ResolveError::UnknownReference { reference } => {
                assert_eq!(reference, "core/v2.EventFilter(ghost)");
            }
            other => panic!("expected UnknownReference, got {:?}", other),
        }
    }

    #[test]
    fn resolve_ambiguous_reference_errors_before_any_filter_runs() {
        let mut registry = FilterRegistry::new();
        registry.register(Arc::new(StaticAdapter {
            name: "First",
            claims: "contested",
            deny: false,
        }));
        registry.register(Arc::new(StaticAdapter {
            name: "Second",
            claims: "contested",
            deny: true,
        }));

        let err = registry
            .resolve(&ResourceReference::event_filter("contested"))
            .unwrap_err();
        match err {
            ResolveError::Ambiguous { candidates, .. } => {
                assert_eq!(candidates, vec!["First".to_string(), "Second".to_string()]);
            }
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn builtins_cover_core_references_unambiguously() {
        let provider = Arc::new(MemoryProvider::new());
        let registry = FilterRegistry::with_builtins(provider);
        assert_eq!(registry.len(), 4);

        for name in BUILTIN_FILTER_NAMES {
            let adapter = registry
                .resolve(&ResourceReference::event_filter(name))
                .unwrap();
            assert_ne!(adapter.name(), "ExpressionAdapter");
        }

        let custom = registry
            .resolve(&ResourceReference::event_filter("my_custom_filter"))
            .unwrap();
        assert_eq!(custom.name(), "ExpressionAdapter");
    }

    #[test]
    fn non_filter_references_are_unknown() {
        let provider = Arc::new(MemoryProvider::new());
        let registry = FilterRegistry::with_builtins(provider);
        let err = registry
            .resolve(&ResourceReference::handler("not_silenced"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownReference { .. }));
    }
}
