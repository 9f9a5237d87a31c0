//! Extension handler seam.
//!
//! Extension handlers (e.g. gRPC-backed sinks) are owned by the
//! embedder: the transport lives behind the [`ExtensionExecutor`]
//! trait, and the engine only routes events to the executor registered
//! for the handler's target name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::event::Event;

/// An embedder-provided executor for one extension target.
#[async_trait]
pub trait ExtensionExecutor: Send + Sync {
    /// Target name this executor serves.
    fn name(&self) -> &str;

    /// Deliver the event through the extension transport.
    async fn execute(&self, event: &Event) -> Result<(), DispatchError>;
}

impl std::fmt::Debug for dyn ExtensionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionExecutor")
            .field("name", &self.name())
            .finish()
    }
}

/// Routes extension handler dispatches to registered executors.
#[derive(Debug, Default)]
pub struct ExtensionRouter {
    executors: HashMap<String, Arc<dyn ExtensionExecutor>>,
}

impl ExtensionRouter {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its target name. A later registration
    /// for the same name replaces the earlier one.
    pub fn register(&mut self, executor: Arc<dyn ExtensionExecutor>) {
        tracing::debug!(target = %executor.name(), "Registered extension executor");
        self.executors.insert(executor.name().to_string(), executor);
    }

    pub(crate) async fn execute(&self, target: &str, event: &Event) -> Result<(), DispatchError> {
        match self.executors.get(target) {
            Some(executor) => executor.execute(event).await,
            None => Err(DispatchError::UnknownExtension {
                target: target.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        name: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExtensionExecutor for CountingExecutor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _event: &Event) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_to_registered_executor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = ExtensionRouter::new();
        router.register(Arc::new(CountingExecutor {
            name: "grpc-sink".to_string(),
            calls: Arc::clone(&calls),
        }));

        let event = Event::fixture("server-01", "check_cpu");
        router.execute("grpc-sink", &event).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_target_errors() {
        let router = ExtensionRouter::new();
        let event = Event::fixture("server-01", "check_cpu");

        let result = router.execute("missing", &event).await;
        match result {
            Err(DispatchError::UnknownExtension { target }) => assert_eq!(target, "missing"),
            other => panic!("expected UnknownExtension, got {:?}", other),
        }
    }
}
