//! User-defined expression filters.
//!
//! Services every `core/v2` EventFilter reference not claimed by a
//! built-in adapter. The filter definition is loaded from the resource
//! provider and its expressions are evaluated against the event, which
//! is exposed to the expression language as the structured `event`
//! variable (e.g. `event.check.status == 2`).
//!
//! Expressions combine with AND semantics. An `allow` filter denies the
//! event unless every expression is true; a `deny` filter denies the
//! event when every expression is true. Any evaluation or lookup error
//! is fail-closed: the owning workflow is denied and the error is
//! surfaced to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use minijinja::{context, Environment};

use crate::error::{FilterError, ResolveError};
use crate::event::Event;
use crate::resource::{FilterAction, FilterDef, ResourceProvider, ResourceReference};

use super::{is_core_event_filter, FilterAdapter, BUILTIN_FILTER_NAMES};

/// Evaluates user-configured expression filters.
pub struct ExpressionAdapter {
    provider: Arc<dyn ResourceProvider>,
}

impl ExpressionAdapter {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }

    /// Evaluate every expression of the definition against the event.
    /// Returns true only if all expressions are true.
    fn all_expressions_true(def: &FilterDef, event: &Event) -> Result<bool, FilterError> {
        let env = Environment::new();
        for source in &def.expressions {
            let expr = env
                .compile_expression(source)
                .map_err(|e| FilterError::Evaluation {
                    filter: def.name.clone(),
                    message: format!("expression '{}': {}", source, e),
                })?;
            let result = expr
                .eval(context! { event => event })
                .map_err(|e| FilterError::Evaluation {
                    filter: def.name.clone(),
                    message: format!("expression '{}': {}", source, e),
                })?;
            if !result.is_true() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for ExpressionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionAdapter").finish()
    }
}

#[async_trait]
impl FilterAdapter for ExpressionAdapter {
    fn name(&self) -> &str {
        "ExpressionAdapter"
    }

    fn can_filter(&self, reference: &ResourceReference) -> bool {
        is_core_event_filter(reference) && !BUILTIN_FILTER_NAMES.contains(&reference.name.as_str())
    }

    async fn filter(
        &self,
        reference: &ResourceReference,
        event: &Event,
    ) -> Result<bool, FilterError> {
        let def = self.provider.get_filter(reference).await.ok_or_else(|| {
            FilterError::Resolve(ResolveError::UnknownReference {
                reference: reference.to_string(),
            })
        })?;

        let matched = Self::all_expressions_true(&def, event).inspect_err(|e| {
            metrics::counter!(
                "eventflow_filter_eval_errors_total",
                "filter" => def.name.clone()
            )
            .increment(1);
            tracing::warn!(
                filter = %def.name,
                error = %e,
                "Expression filter evaluation failed, denying event"
            );
        })?;

        let deny = match def.action {
            FilterAction::Allow => !matched,
            FilterAction::Deny => matched,
        };
        Ok(deny)
    }
}
