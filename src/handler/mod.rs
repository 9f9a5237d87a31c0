//! Handler dispatch stage: deliver the (possibly mutated) event to its
//! configured sink.
//!
//! Handler kinds are a tagged set of variants: *pipe* (spawn a local
//! executable), *tcp*/*udp* (socket write), *extension* (embedder-owned
//! transport behind a trait) and *set* (fan out to a named group of
//! handlers, recursively, with cycle detection). Every leaf dispatch is
//! bounded by the handler's configured timeout and by the caller's
//! cancellation token; an aborted dispatch kills the spawned process or
//! drops the socket rather than leaking it. The stage never retries;
//! that decision belongs to the caller.

pub mod extension;
pub mod pipe;
pub mod socket;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, ResolveError};
use crate::event::Event;
use crate::resource::{HandlerDef, HandlerKind, ResourceProvider, TYPE_HANDLER};

pub use extension::{ExtensionExecutor, ExtensionRouter};

/// Dispatch deadline applied when a handler definition sets none.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives handler dispatch for the pipeline orchestrator.
#[derive(Debug)]
pub struct HandlerDispatcher {
    /// Store used to resolve set-handler members by name.
    provider: Arc<dyn ResourceProvider>,
    extensions: ExtensionRouter,
}

impl HandlerDispatcher {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            provider,
            extensions: ExtensionRouter::new(),
        }
    }

    /// Dispatcher with embedder-registered extension executors.
    pub fn with_extensions(provider: Arc<dyn ResourceProvider>, extensions: ExtensionRouter) -> Self {
        Self {
            provider,
            extensions,
        }
    }

    /// Deliver the event through the given handler definition.
    pub async fn dispatch(
        &self,
        def: &HandlerDef,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        self.dispatch_guarded(def, event, cancel, Vec::new()).await
    }

    /// Recursive dispatch entry carrying the chain of set-handler names
    /// already being expanded, for cycle detection.
    fn dispatch_guarded<'a>(
        &'a self,
        def: &'a HandlerDef,
        event: &'a Event,
        cancel: &'a CancellationToken,
        chain: Vec<String>,
    ) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            if chain.contains(&def.name) {
                let display = format!("{} -> {}", chain.join(" -> "), def.name);
                metrics::counter!(
                    "eventflow_handler_cycles_total",
                    "handler" => def.name.clone()
                )
                .increment(1);
                return Err(DispatchError::CyclicReference {
                    handler: def.name.clone(),
                    chain: display,
                });
            }

            match &def.kind {
                HandlerKind::Set { handlers } => {
                    let mut chain = chain;
                    chain.push(def.name.clone());
                    self.dispatch_set(def, handlers, event, cancel, chain).await
                }
                _ => self.dispatch_leaf(def, event, cancel).await,
            }
        })
    }

    /// Run a leaf handler under its deadline and the caller's
    /// cancellation token.
    async fn dispatch_leaf(
        &self,
        def: &HandlerDef,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let deadline = def.timeout.unwrap_or(DEFAULT_HANDLER_TIMEOUT);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(handler = %def.name, "Dispatch aborted by cancellation");
                Err(DispatchError::Cancelled {
                    handler: def.name.clone(),
                })
            }
            result = tokio::time::timeout(deadline, self.run_leaf(def, event)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => {
                        metrics::counter!(
                            "eventflow_handler_timeouts_total",
                            "handler" => def.name.clone()
                        )
                        .increment(1);
                        tracing::warn!(
                            handler = %def.name,
                            timeout_ms = deadline.as_millis() as u64,
                            "Handler dispatch timed out"
                        );
                        Err(DispatchError::Timeout {
                            handler: def.name.clone(),
                            timeout: deadline,
                        })
                    }
                }
            }
        }
    }

    async fn run_leaf(&self, def: &HandlerDef, event: &Event) -> Result<(), DispatchError> {
        match &def.kind {
            HandlerKind::Pipe { command, args, env } => {
                pipe::dispatch(&def.name, command, args, env, event).await
            }
            HandlerKind::Tcp { address } => socket::dispatch_tcp(&def.name, address, event).await,
            HandlerKind::Udp { address } => socket::dispatch_udp(&def.name, address, event).await,
            HandlerKind::Extension { target } => self.extensions.execute(target, event).await,
            HandlerKind::Set { .. } => Err(DispatchError::Io {
                handler: def.name.clone(),
                message: "set handler cannot be dispatched as a leaf".to_string(),
            }),
        }
    }

    /// Fan out to all members of a set handler in parallel. Member
    /// failures are independent; a detected cycle outranks them all.
    async fn dispatch_set(
        &self,
        def: &HandlerDef,
        members: &[String],
        event: &Event,
        cancel: &CancellationToken,
        chain: Vec<String>,
    ) -> Result<(), DispatchError> {
        let futures: Vec<_> = members
            .iter()
            .map(|member| {
                let chain = chain.clone();
                async move {
                    let result = match self.provider.get_handler_by_name(member).await {
                        Some(member_def) => {
                            self.dispatch_guarded(&member_def, event, cancel, chain).await
                        }
                        None => Err(DispatchError::Resolve(ResolveError::UnknownReference {
                            reference: format!("core/v2.{}({})", TYPE_HANDLER, member),
                        })),
                    };
                    (member.clone(), result)
                }
            })
            .collect();

        let results = join_all(futures).await;

        let total = results.len();
        let mut failed = 0;
        let mut cycle = None;
        for (member, result) in results {
            match result {
                Ok(()) => {}
                Err(e @ DispatchError::CyclicReference { .. }) => {
                    cycle.get_or_insert(e);
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        handler = %def.name,
                        member = %member,
                        error = %e,
                        "Set handler member failed"
                    );
                }
            }
        }

        if let Some(cycle) = cycle {
            return Err(cycle);
        }
        if failed > 0 {
            return Err(DispatchError::SetFailures {
                handler: def.name.clone(),
                failed,
                total,
            });
        }
        Ok(())
    }
}
