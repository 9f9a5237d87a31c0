//! Workflow/pipeline orchestrator.
//!
//! Runs one event through every workflow of a pipeline. Each workflow
//! is an independent unit: it gets its own clone of the event, its
//! filter chain is evaluated in order with deny short-circuit, then the
//! optional mutator runs, then the handler dispatches. Workflows are
//! evaluated concurrently under a bounded worker pool and supervised
//! via `JoinSet`; a failure (or panic) in one workflow never prevents
//! evaluation of its siblings, and outcomes are reported in workflow
//! order regardless of completion order.
//!
//! Per-workflow state machine:
//!
//! ```text
//! Start -> Filtering -> (Denied | Mutating)
//!                          Mutating -> (MutateFailed | Dispatching)
//!                          Dispatching -> (DispatchFailed | Done)
//! ```
//!
//! `Denied` and `Done` are terminal success states: an explicit deny is
//! not an error. Filter evaluation and resolution errors are fail-closed
//! and land in `Denied` with the error attached.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{DispatchError, ResolveError, WorkflowError};
use crate::event::Event;
use crate::filter::FilterRegistry;
use crate::handler::HandlerDispatcher;
use crate::mutator::MutatorRegistry;
use crate::resource::{Pipeline, ResourceProvider, Workflow};

/// Upper bound on concurrently evaluated workflows of one pipeline.
const DEFAULT_WORKFLOW_CONCURRENCY: usize = 8;

/// Terminal state of one workflow evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    /// A filter stopped the event; not an error.
    Denied,
    /// The mutator failed; no handler was dispatched.
    MutateFailed,
    /// Handler dispatch failed.
    DispatchFailed,
    /// The handler was dispatched successfully.
    Done,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Denied => "denied",
            WorkflowState::MutateFailed => "mutate_failed",
            WorkflowState::DispatchFailed => "dispatch_failed",
            WorkflowState::Done => "done",
        }
    }

    /// Whether the state is a terminal success (`Denied` or `Done`).
    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowState::Denied | WorkflowState::Done)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one workflow evaluation.
#[derive(Debug)]
pub struct WorkflowOutcome {
    /// Workflow name.
    pub workflow: String,
    /// Terminal state reached.
    pub state: WorkflowState,
    /// Name of the filter that denied the event, when one did.
    pub filtered_by: Option<String>,
    /// Error that terminated the workflow, when one did. A plain deny
    /// carries no error; a fail-closed deny carries the filter error.
    pub error: Option<WorkflowError>,
}

/// Aggregated result of running one event through one pipeline.
#[derive(Debug)]
pub struct PipelineResult {
    pub pipeline: String,
    /// One outcome per workflow, in workflow order.
    pub outcomes: Vec<WorkflowOutcome>,
}

impl PipelineResult {
    /// Whether any workflow ended in a failure state.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.state.is_success())
    }
}

/// Orchestrates pipelines over events.
///
/// The runner is stateless between invocations: re-running the same
/// event through the same pipeline against the same definitions
/// produces the same decisions.
#[derive(Debug)]
pub struct PipelineRunner {
    provider: Arc<dyn ResourceProvider>,
    filters: Arc<FilterRegistry>,
    mutators: Arc<MutatorRegistry>,
    dispatcher: Arc<HandlerDispatcher>,
    concurrency: usize,
}

impl PipelineRunner {
    /// Runner wired with the built-in filter and mutator adapters and a
    /// dispatcher without extension executors.
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        let filters = Arc::new(FilterRegistry::with_builtins(Arc::clone(&provider)));
        let mutators = Arc::new(MutatorRegistry::with_builtins(Arc::clone(&provider)));
        let dispatcher = Arc::new(HandlerDispatcher::new(Arc::clone(&provider)));
        Self::with_components(provider, filters, mutators, dispatcher)
    }

    /// Runner over explicitly constructed registries, for embedders
    /// that add custom adapters or extension executors.
    pub fn with_components(
        provider: Arc<dyn ResourceProvider>,
        filters: Arc<FilterRegistry>,
        mutators: Arc<MutatorRegistry>,
        dispatcher: Arc<HandlerDispatcher>,
    ) -> Self {
        Self {
            provider,
            filters,
            mutators,
            dispatcher,
            concurrency: DEFAULT_WORKFLOW_CONCURRENCY,
        }
    }

    /// Override the workflow worker-pool width.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Look the pipeline up by name in the resource provider and run it.
    pub async fn run_by_name(
        &self,
        event: &Event,
        pipeline_name: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, ResolveError> {
        let pipeline = self.provider.get_pipeline(pipeline_name).await.ok_or_else(|| {
            ResolveError::UnknownReference {
                reference: format!("core/v2.Pipeline({})", pipeline_name),
            }
        })?;
        Ok(self.run(event, &pipeline, cancel).await)
    }

    /// Run one event through every workflow of the pipeline.
    pub async fn run(
        &self,
        event: &Event,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        metrics::counter!(
            "eventflow_events_processed_total",
            "pipeline" => pipeline.name.clone()
        )
        .increment(1);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(usize, WorkflowOutcome)> = JoinSet::new();
        // Map task ID to (index, workflow name, handler name) so a
        // panicked task can still be reported in order.
        let mut task_meta: HashMap<tokio::task::Id, (usize, String, String)> = HashMap::new();

        for (index, workflow) in pipeline.workflows.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let provider = Arc::clone(&self.provider);
            let filters = Arc::clone(&self.filters);
            let mutators = Arc::clone(&self.mutators);
            let dispatcher = Arc::clone(&self.dispatcher);
            // Independent working copy per workflow, so one workflow's
            // mutation can never leak into a sibling.
            let event = event.clone();
            let workflow = workflow.clone();
            let cancel = cancel.clone();
            let workflow_name = workflow.name.clone();
            let handler_name = workflow.handler.name.clone();

            let span = tracing::info_span!(
                "workflow",
                pipeline = %pipeline.name,
                workflow = %workflow.name
            );
            let handle = tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome =
                        run_workflow(provider, filters, mutators, dispatcher, workflow, event, cancel)
                            .await;
                    (index, outcome)
                }
                .instrument(span),
            );
            task_meta.insert(handle.id(), (index, workflow_name, handler_name));
        }

        let mut slots: Vec<Option<WorkflowOutcome>> =
            pipeline.workflows.iter().map(|_| None).collect();

        while let Some(result) = tasks.join_next_with_id().await {
            match result {
                Ok((task_id, (index, outcome))) => {
                    task_meta.remove(&task_id);
                    slots[index] = Some(outcome);
                }
                Err(join_error) => {
                    let task_id = join_error.id();
                    if let Some((index, workflow_name, handler_name)) = task_meta.remove(&task_id)
                    {
                        tracing::error!(
                            workflow = %workflow_name,
                            error = %join_error,
                            "Workflow task panicked"
                        );
                        metrics::counter!(
                            "eventflow_workflow_panics_total",
                            "workflow" => workflow_name.clone()
                        )
                        .increment(1);
                        slots[index] = Some(WorkflowOutcome {
                            workflow: workflow_name,
                            state: WorkflowState::DispatchFailed,
                            filtered_by: None,
                            error: Some(WorkflowError::Dispatch(DispatchError::Io {
                                handler: handler_name,
                                message: format!("workflow task panicked: {}", join_error),
                            })),
                        });
                    }
                }
            }
        }

        let outcomes: Vec<WorkflowOutcome> = slots.into_iter().flatten().collect();
        for outcome in &outcomes {
            metrics::counter!(
                "eventflow_workflow_outcomes_total",
                "pipeline" => pipeline.name.clone(),
                "state" => outcome.state.as_str()
            )
            .increment(1);
        }

        PipelineResult {
            pipeline: pipeline.name.clone(),
            outcomes,
        }
    }
}

/// Evaluate one workflow against its own copy of the event.
async fn run_workflow(
    provider: Arc<dyn ResourceProvider>,
    filters: Arc<FilterRegistry>,
    mutators: Arc<MutatorRegistry>,
    dispatcher: Arc<HandlerDispatcher>,
    workflow: Workflow,
    event: Event,
    cancel: CancellationToken,
) -> WorkflowOutcome {
    let denied = |filtered_by: Option<String>, error: Option<WorkflowError>| WorkflowOutcome {
        workflow: workflow.name.clone(),
        state: WorkflowState::Denied,
        filtered_by,
        error,
    };

    // Filtering: in configured order, first deny short-circuits the
    // rest of this workflow only.
    for reference in &workflow.filters {
        let adapter = match filters.resolve(reference) {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!(
                    filter = %reference,
                    error = %e,
                    "Filter reference did not resolve, denying event"
                );
                return denied(None, Some(WorkflowError::Filter(e.into())));
            }
        };

        match adapter.filter(reference, &event).await {
            Ok(false) => {}
            Ok(true) => {
                metrics::counter!(
                    "eventflow_events_filtered_total",
                    "filter" => reference.name.clone()
                )
                .increment(1);
                tracing::debug!(filter = %reference, "Event denied by filter");
                return denied(Some(reference.name.clone()), None);
            }
            Err(e) => {
                // Fail-closed: an erroring filter denies the event and
                // the error travels up for logging.
                return denied(Some(reference.name.clone()), Some(WorkflowError::Filter(e)));
            }
        }
    }

    // Mutating: copy-on-write transform of this workflow's event copy.
    let event = match &workflow.mutator {
        None => event,
        Some(reference) => {
            let adapter = match mutators.resolve(reference) {
                Ok(adapter) => adapter,
                Err(e) => {
                    return WorkflowOutcome {
                        workflow: workflow.name.clone(),
                        state: WorkflowState::MutateFailed,
                        filtered_by: None,
                        error: Some(WorkflowError::Mutate(e.into())),
                    }
                }
            };
            match adapter.mutate(reference, &event).await {
                Ok(mutated) => mutated,
                Err(e) => {
                    return WorkflowOutcome {
                        workflow: workflow.name.clone(),
                        state: WorkflowState::MutateFailed,
                        filtered_by: None,
                        error: Some(WorkflowError::Mutate(e)),
                    }
                }
            }
        }
    };

    // Dispatching.
    let handler_def = match provider.get_handler(&workflow.handler).await {
        Some(def) => def,
        None => {
            return WorkflowOutcome {
                workflow: workflow.name.clone(),
                state: WorkflowState::DispatchFailed,
                filtered_by: None,
                error: Some(WorkflowError::Dispatch(DispatchError::Resolve(
                    ResolveError::UnknownReference {
                        reference: workflow.handler.to_string(),
                    },
                ))),
            }
        }
    };

    match dispatcher.dispatch(&handler_def, &event, &cancel).await {
        Ok(()) => {
            tracing::debug!(handler = %handler_def.name, "Workflow completed");
            WorkflowOutcome {
                workflow: workflow.name.clone(),
                state: WorkflowState::Done,
                filtered_by: None,
                error: None,
            }
        }
        Err(e) => {
            metrics::counter!(
                "eventflow_dispatch_errors_total",
                "handler" => handler_def.name.clone()
            )
            .increment(1);
            tracing::error!(
                handler = %handler_def.name,
                error = %e,
                "Handler dispatch failed"
            );
            WorkflowOutcome {
                workflow: workflow.name.clone(),
                state: WorkflowState::DispatchFailed,
                filtered_by: None,
                error: Some(WorkflowError::Dispatch(e)),
            }
        }
    }
}
