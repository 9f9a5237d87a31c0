//! Centralized error types for eventflow using thiserror.
//!
//! This module defines all error types used throughout the engine,
//! one enum per pipeline concern. Stage errors never panic the process;
//! they terminate the owning workflow and are reported to the caller as
//! part of the per-workflow result.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the metric wire codec.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed payload: truncated input")]
    Truncated,
    #[error("malformed payload: length prefix {length} exceeds remaining {remaining} bytes")]
    InvalidLength { length: u64, remaining: usize },
    #[error("malformed payload: varint overflows 64 bits")]
    VarintOverflow,
    #[error("malformed payload: unsupported wire type {0}")]
    UnsupportedWireType(u8),
    #[error("malformed payload: illegal field tag {0}")]
    IllegalTag(u64),
    #[error("malformed payload: invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Errors produced while resolving a resource reference to an adapter
/// or a stored definition.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no adapter or definition found for reference '{reference}'")]
    UnknownReference { reference: String },
    #[error("ambiguous reference '{reference}': claimed by adapters {candidates:?}")]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },
}

/// Errors produced by filter evaluation.
///
/// Evaluation failures are fail-closed: the owning workflow is denied
/// and the error is surfaced for logging, never silently allowed through.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("filter '{filter}' evaluation failed: {message}")]
    Evaluation { filter: String, message: String },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Errors produced by the mutator stage.
#[derive(Error, Debug)]
pub enum MutateError {
    #[error("mutator '{mutator}' failed: {message}")]
    Failed { mutator: String, message: String },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Errors produced by handler dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("handler '{handler}' timed out after {timeout:?}")]
    Timeout { handler: String, timeout: Duration },
    #[error("cyclic handler reference through '{handler}' (chain: {chain})")]
    CyclicReference { handler: String, chain: String },
    #[error("handler '{handler}' exited with status {status}: {stderr}")]
    NonZeroExit {
        handler: String,
        status: i32,
        stderr: String,
    },
    #[error("handler '{handler}' I/O failure: {message}")]
    Io { handler: String, message: String },
    #[error("handler set '{handler}': {failed} of {total} members failed")]
    SetFailures {
        handler: String,
        failed: usize,
        total: usize,
    },
    #[error("no extension executor registered for target '{target}'")]
    UnknownExtension { target: String },
    #[error("dispatch cancelled for handler '{handler}'")]
    Cancelled { handler: String },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Error attached to a failed workflow outcome, tagged by the stage
/// that produced it.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("filter stage: {0}")]
    Filter(#[from] FilterError),
    #[error("mutator stage: {0}")]
    Mutate(#[from] MutateError),
    #[error("handler stage: {0}")]
    Dispatch(#[from] DispatchError),
}
