// src/lib.rs
//! eventflow - Event pipeline execution engine for monitoring backends.
//!
//! Takes one incoming event plus declaratively configured pipelines
//! (ordered workflows of filter -> mutator -> handler stages) and
//! produces zero or more side-effecting dispatches, enforcing silencing
//! policy along the way. Resource definitions are owned by an external
//! store behind the [`resource::ResourceProvider`] trait; the engine is
//! invoked per event and holds no state between invocations.

pub mod codec;
pub mod error;
pub mod event;
pub mod filter;
pub mod handler;
pub mod mutator;
pub mod pipeline;
pub mod resource;
pub mod silence;

// Re-export commonly used types
pub use codec::{MetricPoint, MetricTag, Metrics};
pub use error::{
    CodecError, DispatchError, FilterError, MutateError, ResolveError, WorkflowError,
};
pub use event::{Check, Entity, Event};
pub use filter::{
    ExpressionAdapter, FilterAdapter, FilterRegistry, HasMetricsAdapter, IsIncidentAdapter,
    NotSilencedAdapter,
};
pub use handler::{ExtensionExecutor, ExtensionRouter, HandlerDispatcher, DEFAULT_HANDLER_TIMEOUT};
pub use mutator::{MutatorAdapter, MutatorRegistry, TemplateMutatorAdapter};
pub use pipeline::{PipelineResult, PipelineRunner, WorkflowOutcome, WorkflowState};
pub use resource::{
    FilterAction, FilterDef, HandlerDef, HandlerKind, MemoryProvider, MutatorDef, MutatorKind,
    Pipeline, ResourceProvider, ResourceReference, Workflow,
};
pub use silence::SilenceEntry;
