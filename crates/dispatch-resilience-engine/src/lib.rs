//! The parallel-dispatch engine: a scheduler that runs a user operation
//! against every item in a source under bounded concurrency, applying
//! retries, rate limiting, circuit breaking, and adaptive concurrency,
//! and emitting results collected or streamed, ordered or in arrival
//! order, under one of three error policies.
//!
//! This crate provides the scheduler and the per-item state machine;
//! [`dispatch_resilience_retry`], [`dispatch_resilience_ratelimiter`],
//! [`dispatch_resilience_circuitbreaker`], and
//! [`dispatch_resilience_adaptive`] provide the resilience layers it
//! composes, and [`dispatch_resilience_core`] the shared error/telemetry
//! plumbing. Pipeline composition lives in [`pipeline`].

mod engine;
mod guard;
mod item;
mod options;
mod pipeline;
mod reorder;
mod state_machine;

pub use dispatch_resilience_core::DispatchError;

pub use engine::{dispatch_collect, dispatch_stream, DispatchReport, DispatchStream, InputStream};
pub use item::{AttemptRecord, Outcome, ResultEnvelope, SkipReason};
pub use options::{DispatchOptions, DispatchOptionsBuilder, ErrorMode, MetricsOptions, ProgressOptions, SamplingOptions};
pub use pipeline::{
    BatchSelectStage, BatchStage, BufferStage, CustomStage, FilterStage, Pipeline, PipelineBuilder, PipelineContext,
    PipelineError, PipelineHooks, PipelineReport, PipelineSummary, SelectManyStage, Stage, StageOutcome, TapStage,
    ThrottleStage, TransformStage,
};
pub use state_machine::{boxed_op, UserOp};
