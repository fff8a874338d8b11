//! Pipeline composer (spec section 4.8): chains dispatch-backed stages,
//! connected by bounded channels, with per-stage policy overrides and
//! pipeline-wide cancellation on the first unhandled failure.
//!
//! A [`Pipeline`] is built by feeding a source into a [`PipelineBuilder`]
//! and chaining `.stage(...)` calls; each call may change the item type,
//! mirroring an iterator adaptor chain. Built-in stage kinds (`Transform`,
//! `Filter`, `SelectMany`, `Batch`, `BatchSelect`, `Buffer`, `Throttle`,
//! `Tap`) are tagged structs implementing the single-method [`Stage`]
//! trait; [`CustomStage`] lets a caller supply their own.

use crate::engine::{dispatch_stream, InputStream};
use crate::item::Outcome;
use crate::options::DispatchOptions;
use crate::state_machine::{boxed_op, UserOp};
use dispatch_resilience_core::DispatchError;
use dispatch_resilience_ratelimiter::RateLimiter;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// The terminal outcome of one item passing through a dispatch-backed
/// stage: either it is forwarded downstream, or the stage observed an
/// unhandled failure that should cancel the whole pipeline.
#[derive(Debug, Clone)]
pub enum StageOutcome<T, E> {
    Emit(T),
    Failed(DispatchError<E>),
}

/// A pipeline-wide failure: which stage raised it, and the underlying
/// dispatch error (spec section 4.8: "a failure in stage k cancels all
/// upstream and downstream stages").
#[derive(Debug, Clone)]
pub struct PipelineError<E> {
    pub stage: String,
    pub source: DispatchError<E>,
}

impl<E: std::fmt::Display> std::fmt::Display for PipelineError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipeline stage '{}' failed: {}", self.stage, self.source)
    }
}

/// Shared per-run state passed to every stage's [`Stage::execute`]: the
/// pipeline-wide cancellation token and the first-failure slot. Cheap to
/// clone; every clone refers to the same run.
pub struct PipelineContext<E> {
    cancel: CancellationToken,
    error: Arc<Mutex<Option<PipelineError<E>>>>,
    on_stage_start: Option<Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>>,
}

impl<E> Clone for PipelineContext<E> {
    fn clone(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            error: Arc::clone(&self.error),
            on_stage_start: self.on_stage_start.clone(),
        }
    }
}

impl<E> PipelineContext<E> {
    /// The cancellation token shared by every stage in this run. Cancelling
    /// it stops the input pump and every worker of every dispatch-backed
    /// stage (spec section 4.8).
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Records the first unhandled failure (subsequent calls are ignored)
    /// and cancels the run.
    pub fn fail(&self, stage: impl Into<String>, source: DispatchError<E>) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(PipelineError {
                stage: stage.into(),
                source,
            });
        }
        self.cancel.cancel();
    }

    fn fire_stage_start(&self, name: &str) {
        if let Some(hook) = &self.on_stage_start {
            let hook = Arc::clone(hook);
            let name = name.to_string();
            tokio::spawn(async move {
                let _ = crate::guard::guard("onStageStart", hook(name)).await;
            });
        }
    }
}

/// A single composable step in a [`Pipeline`] (spec section 4.8). Built-in
/// kinds are tagged variants below; [`CustomStage`] wraps an arbitrary
/// closure for anything the built-ins don't cover.
pub trait Stage<In, Out, E>: Send
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// The stage's name, used for `onStageStart` and in [`PipelineError`].
    fn name(&self) -> &str;

    /// Consumes the upstream stream and returns the downstream stream.
    /// Implementations spawn whatever background tasks they need and
    /// return immediately; they must honor `ctx.cancel_token()`. Takes
    /// `self` by value since a stage runs exactly once per pipeline.
    fn execute(self, input: InputStream<In>, ctx: PipelineContext<E>) -> InputStream<Out>
    where
        Self: Sized;
}

/// Runs `op` over `input` through the dispatch engine in fail-fast mode,
/// forwarding every success downstream and routing the first failure into
/// `ctx` (cancelling the run) rather than propagating a per-item error.
/// Shared by every dispatch-backed built-in stage.
fn run_dispatch_stage<In, Out, E>(
    stage_name: String,
    input: InputStream<In>,
    ctx: PipelineContext<E>,
    op: UserOp<In, Out, E>,
    options: DispatchOptions<Out, E>,
) -> InputStream<Out>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    ctx.fire_stage_start(&stage_name);

    let dispatch = dispatch_stream(input, None, op, options, ctx.cancel.clone());

    let fail_ctx = ctx.clone();
    let terminal_stage_name = stage_name.clone();
    tokio::spawn(async move {
        if let Ok(Some(err)) = dispatch.terminal_error.await {
            fail_ctx.fail(terminal_stage_name, err);
        }
    });

    let emit_ctx = ctx.clone();
    dispatch
        .results
        .filter_map(move |envelope| {
            let emit_ctx = emit_ctx.clone();
            let stage_name = stage_name.clone();
            async move {
                match envelope.outcome {
                    Outcome::Success(value) => Some(value),
                    Outcome::Failed(err) => {
                        emit_ctx.fail(stage_name, err);
                        None
                    }
                    Outcome::Skipped(_) => None,
                }
            }
        })
        .boxed()
}

/// One-in one-out stage via a user operation (spec section 4.8,
/// "Transform"). Delegates directly to the dispatch engine.
pub struct TransformStage<In, Out, E> {
    name: String,
    op: UserOp<In, Out, E>,
    options: DispatchOptions<Out, E>,
}

impl<In, Out, E> TransformStage<In, Out, E>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Creates a transform stage named `name`, backed by `op` under `options`.
    pub fn new<F, Fut>(name: impl Into<String>, op: F, options: DispatchOptions<Out, E>) -> Self
    where
        F: Fn(In, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            op: boxed_op(op),
            options,
        }
    }
}

impl<In, Out, E> Stage<In, Out, E> for TransformStage<In, Out, E>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<In>, ctx: PipelineContext<E>) -> InputStream<Out> {
        run_dispatch_stage(self.name, input, ctx, self.op, self.options)
    }
}

/// One-in zero-or-one stage via a user predicate (spec section 4.8,
/// "Filter"). The predicate runs under the same concurrency/retry policy
/// as any other dispatch-backed stage; items for which it returns `false`
/// are dropped.
pub struct FilterStage<In, E> {
    name: String,
    op: UserOp<In, Option<In>, E>,
    options: DispatchOptions<Option<In>, E>,
}

impl<In, E> FilterStage<In, E>
where
    In: Send + 'static,
{
    /// Creates a filter stage named `name` that keeps items for which
    /// `predicate` resolves `true`.
    pub fn new<F, Fut>(name: impl Into<String>, predicate: F, options: DispatchOptions<Option<In>, E>) -> Self
    where
        F: Fn(&In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let predicate = Arc::new(predicate);
        let op = boxed_op(move |item: In, _scope| {
            let predicate = Arc::clone(&predicate);
            async move {
                let keep = predicate(&item).await;
                Ok::<Option<In>, E>(if keep { Some(item) } else { None })
            }
        });
        Self {
            name: name.into(),
            op,
            options,
        }
    }
}

impl<In, E> Stage<In, In, E> for FilterStage<In, E>
where
    In: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<In>, ctx: PipelineContext<E>) -> InputStream<In> {
        run_dispatch_stage(self.name, input, ctx, self.op, self.options)
            .filter_map(|maybe| async move { maybe })
            .boxed()
    }
}

/// One-in many-out stage (spec section 4.8, "SelectMany"/flatten). The
/// user operation produces a `Vec<Out>` per input item; every element is
/// forwarded downstream in order.
pub struct SelectManyStage<In, Out, E> {
    name: String,
    op: UserOp<In, Vec<Out>, E>,
    options: DispatchOptions<Vec<Out>, E>,
}

impl<In, Out, E> SelectManyStage<In, Out, E>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Creates a select-many stage named `name`.
    pub fn new<F, Fut>(name: impl Into<String>, op: F, options: DispatchOptions<Vec<Out>, E>) -> Self
    where
        F: Fn(In, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Out>, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            op: boxed_op(op),
            options,
        }
    }
}

impl<In, Out, E> Stage<In, Out, E> for SelectManyStage<In, Out, E>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<In>, ctx: PipelineContext<E>) -> InputStream<Out> {
        run_dispatch_stage(self.name, input, ctx, self.op, self.options)
            .flat_map(|group| futures::stream::iter(group))
            .boxed()
    }
}

/// Groups every `size` consecutive inputs into one `Vec<T>` output (spec
/// section 4.8, "Batch"). The final group may be smaller than `size` if
/// the source doesn't divide evenly. No user operation; pure regrouping.
pub struct BatchStage {
    name: String,
    size: usize,
}

impl BatchStage {
    /// Creates a batch stage named `name` grouping `size` items per batch.
    /// `size` is clamped to at least 1.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size: size.max(1),
        }
    }
}

impl<T> Stage<T, Vec<T>, ()> for BatchStage
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<T>, ctx: PipelineContext<()>) -> InputStream<Vec<T>> {
        ctx.fire_stage_start(&self.name);
        input.chunks(self.size).boxed()
    }
}

/// Batch + user operation applied to each group (spec section 4.8,
/// "BatchSelect"): groups `size` consecutive inputs, then runs `op` on
/// each `Vec<In>` under the dispatch engine.
pub struct BatchSelectStage<In, Out, E> {
    name: String,
    size: usize,
    op: UserOp<Vec<In>, Out, E>,
    options: DispatchOptions<Out, E>,
}

impl<In, Out, E> BatchSelectStage<In, Out, E>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Creates a batch-select stage named `name`, grouping `size` items per
    /// batch (clamped to at least 1) and running `op` over each batch.
    pub fn new<F, Fut>(name: impl Into<String>, size: usize, op: F, options: DispatchOptions<Out, E>) -> Self
    where
        F: Fn(Vec<In>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            size: size.max(1),
            op: boxed_op(op),
            options,
        }
    }
}

impl<In, Out, E> Stage<In, Out, E> for BatchSelectStage<In, Out, E>
where
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<In>, ctx: PipelineContext<E>) -> InputStream<Out> {
        let batches: InputStream<Vec<In>> = input.chunks(self.size).boxed();
        run_dispatch_stage(self.name, batches, ctx, self.op, self.options)
    }
}

/// Inserts a bounded queue between producer and consumer, decoupling their
/// rates (spec section 4.8, "Buffer"). The producer (upstream) blocks once
/// `capacity` items are unconsumed; the consumer (downstream) never
/// observes upstream's pace directly.
pub struct BufferStage {
    name: String,
    capacity: usize,
}

impl BufferStage {
    /// Creates a buffer stage named `name` with the given channel capacity
    /// (clamped to at least 1).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
        }
    }
}

impl<T, E> Stage<T, T, E> for BufferStage
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, mut input: InputStream<T>, ctx: PipelineContext<E>) -> InputStream<T> {
        ctx.fire_stage_start(&self.name);
        let (tx, rx) = tokio::sync::mpsc::channel(self.capacity);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = input.next() => {
                        match next {
                            Some(item) => {
                                if tx.send(item).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }
}

/// Wraps the token-bucket rate limiter as a stage (spec section 4.8,
/// "Throttle"): each item waits for an available token before being
/// forwarded downstream. Preserves arrival order.
pub struct ThrottleStage {
    name: String,
    limiter: RateLimiter,
}

impl ThrottleStage {
    /// Creates a throttle stage named `name`, admitting items through
    /// `limiter`.
    pub fn new(name: impl Into<String>, limiter: RateLimiter) -> Self {
        Self {
            name: name.into(),
            limiter,
        }
    }
}

impl<T, E> Stage<T, T, E> for ThrottleStage
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<T>, ctx: PipelineContext<E>) -> InputStream<T> {
        ctx.fire_stage_start(&self.name);
        let limiter = self.limiter;
        let cancel = ctx.cancel.clone();
        input
            .filter_map(move |item| {
                let limiter = limiter.clone();
                let cancel = cancel.clone();
                async move { limiter.acquire(1, &cancel).await.ok().map(|_waited| item) }
            })
            .boxed()
    }
}

/// Side-effect-only stage that passes every input through unchanged (spec
/// section 4.8, "Tap"). Runs sequentially so the identity law `S -> Tap(f)
/// -> g` observes every element of `S -> g` in the same order.
pub struct TapStage<T> {
    name: String,
    f: Arc<dyn Fn(&T) -> BoxFuture<'static, ()> + Send + Sync>,
}

impl<T> TapStage<T>
where
    T: Send + 'static,
{
    /// Creates a tap stage named `name` invoking `f` for every item.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(move |item| Box::pin(f(item))),
        }
    }
}

impl<T, E> Stage<T, T, E> for TapStage<T>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<T>, ctx: PipelineContext<E>) -> InputStream<T> {
        ctx.fire_stage_start(&self.name);
        let f = self.f;
        input
            .then(move |item| {
                let f = Arc::clone(&f);
                async move {
                    let _ = crate::guard::guard("tap", f(&item)).await;
                    item
                }
            })
            .boxed()
    }
}

/// Wraps an arbitrary closure as a [`Stage`] (spec section 4.8, "Custom").
/// The escape hatch for anything the built-in stage kinds don't cover.
pub struct CustomStage<In, Out, E> {
    name: String,
    exec: Arc<dyn Fn(InputStream<In>, PipelineContext<E>) -> InputStream<Out> + Send + Sync>,
}

impl<In, Out, E> CustomStage<In, Out, E>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Creates a custom stage named `name` whose behavior is entirely
    /// `exec`.
    pub fn new<F>(name: impl Into<String>, exec: F) -> Self
    where
        F: Fn(InputStream<In>, PipelineContext<E>) -> InputStream<Out> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            exec: Arc::new(exec),
        }
    }
}

impl<In, Out, E> Stage<In, Out, E> for CustomStage<In, Out, E>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, input: InputStream<In>, ctx: PipelineContext<E>) -> InputStream<Out> {
        ctx.fire_stage_start(&self.name);
        (self.exec)(input, ctx)
    }
}

/// Summary handed to `onPipelineComplete` (spec section 4.8): how many
/// items the pipeline emitted, and the first failure if any.
#[derive(Debug, Clone)]
pub struct PipelineSummary<E> {
    pub items_emitted: usize,
    pub error: Option<PipelineError<E>>,
}

/// The final outcome of a collected pipeline run.
pub struct PipelineReport<Out, E> {
    pub items: Vec<Out>,
    pub error: Option<PipelineError<E>>,
}

type PipelineStartHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
type StageStartHook = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;
type PipelineCompleteHook<E> = Arc<dyn Fn(PipelineSummary<E>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Lifecycle hooks for one pipeline run (spec section 4.8).
pub struct PipelineHooks<E> {
    on_pipeline_start: Option<PipelineStartHook>,
    on_stage_start: Option<StageStartHook>,
    on_pipeline_complete: Option<PipelineCompleteHook<E>>,
}

impl<E> Default for PipelineHooks<E> {
    fn default() -> Self {
        Self {
            on_pipeline_start: None,
            on_stage_start: None,
            on_pipeline_complete: None,
        }
    }
}

impl<E> PipelineHooks<E> {
    /// An empty set of hooks.
    pub fn none() -> Self {
        Self::default()
    }

    /// Registers `onPipelineStart`, fired once before the first stage runs.
    pub fn on_pipeline_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_pipeline_start = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Registers `onStageStart`, fired once per stage as it begins
    /// consuming its upstream.
    pub fn on_stage_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_stage_start = Some(Arc::new(move |name| Box::pin(f(name))));
        self
    }

    /// Registers `onPipelineComplete`, fired once the run has finished
    /// (successfully or not).
    pub fn on_pipeline_complete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PipelineSummary<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_pipeline_complete = Some(Arc::new(move |summary| Box::pin(f(summary))));
        self
    }
}

/// Builds a [`Pipeline`] by chaining stages onto a source, type-changing at
/// every step the way an iterator adaptor chain does (spec section 4.8).
pub struct PipelineBuilder<T, E> {
    stage_count: usize,
    names: Vec<String>,
    assemble: Box<dyn FnOnce(PipelineContext<E>) -> InputStream<T> + Send>,
}

impl<T, E> PipelineBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Starts a new pipeline fed by `source`.
    pub fn new(source: InputStream<T>) -> Self {
        Self {
            stage_count: 0,
            names: Vec::new(),
            assemble: Box::new(move |_ctx| source),
        }
    }

    /// Appends `stage`, changing the pipeline's current item type from `T`
    /// to `stage`'s output type.
    pub fn stage<Out, S>(self, stage: S) -> PipelineBuilder<Out, E>
    where
        Out: Send + 'static,
        S: Stage<T, Out, E> + 'static,
    {
        let PipelineBuilder {
            stage_count,
            mut names,
            assemble,
        } = self;
        names.push(stage.name().to_string());
        let next_assemble = Box::new(move |ctx: PipelineContext<E>| {
            let input = assemble(ctx.clone());
            stage.execute(input, ctx)
        });
        PipelineBuilder {
            stage_count: stage_count + 1,
            names,
            assemble: next_assemble,
        }
    }

    /// Finalizes the pipeline. Fails with [`DispatchError::InvalidArgument`]
    /// if no stage was ever added (spec section 4.8: "a pipeline must
    /// contain at least one stage").
    pub fn build(self) -> Result<Pipeline<T, E>, DispatchError<E>> {
        if self.stage_count == 0 {
            return Err(DispatchError::InvalidArgument {
                message: "a pipeline must contain at least one stage".to_string(),
            });
        }
        Ok(Pipeline {
            names: self.names,
            assemble: self.assemble,
        })
    }
}

/// An assembled, runnable chain of stages producing `Out` items.
pub struct Pipeline<Out, E> {
    names: Vec<String>,
    assemble: Box<dyn FnOnce(PipelineContext<E>) -> InputStream<Out> + Send>,
}

impl<Out, E> Pipeline<Out, E>
where
    Out: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// The names of every stage in this pipeline, in execution order.
    pub fn stage_names(&self) -> &[String] {
        &self.names
    }

    fn make_context(&self, hooks: &PipelineHooks<E>, cancel: CancellationToken) -> PipelineContext<E> {
        PipelineContext {
            cancel,
            error: Arc::new(Mutex::new(None)),
            on_stage_start: hooks.on_stage_start.clone(),
        }
    }

    /// Runs the pipeline to completion, collecting every emitted item.
    pub async fn run_collect(self, hooks: PipelineHooks<E>, cancel: CancellationToken) -> PipelineReport<Out, E> {
        if let Some(start) = &hooks.on_pipeline_start {
            crate::guard::guard("onPipelineStart", start()).await;
        }

        let ctx = self.make_context(&hooks, cancel.child_token());
        let mut stream = (self.assemble)(ctx.clone());

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }

        let error = ctx.error.lock().unwrap().clone();
        let summary = PipelineSummary {
            items_emitted: items.len(),
            error: error.clone(),
        };
        if let Some(complete) = &hooks.on_pipeline_complete {
            crate::guard::guard("onPipelineComplete", complete(summary)).await;
        }

        PipelineReport { items, error }
    }

    /// Runs the pipeline, returning a live stream of emitted items plus a
    /// receiver for the eventual pipeline error (if any). The receiver
    /// resolves once the underlying stream task has drained its source and
    /// fired `onPipelineComplete` — which happens only once the returned
    /// stream itself has been fully drained by the caller.
    pub fn run_stream(
        self,
        hooks: PipelineHooks<E>,
        cancel: CancellationToken,
    ) -> (BoxStream<'static, Out>, tokio::sync::oneshot::Receiver<Option<PipelineError<E>>>) {
        let ctx = self.make_context(&hooks, cancel.child_token());
        let (terminal_tx, terminal_rx) = tokio::sync::oneshot::channel();
        let (item_tx, item_rx) = tokio::sync::mpsc::channel(64);

        let on_pipeline_start = hooks.on_pipeline_start.clone();
        let on_pipeline_complete = hooks.on_pipeline_complete.clone();
        let assemble = self.assemble;
        let run_ctx = ctx.clone();

        tokio::spawn(async move {
            if let Some(start) = &on_pipeline_start {
                crate::guard::guard("onPipelineStart", start()).await;
            }

            let mut stream = assemble(run_ctx.clone());
            let mut emitted = 0usize;
            while let Some(item) = stream.next().await {
                emitted += 1;
                if item_tx.send(item).await.is_err() {
                    break;
                }
            }

            let error = run_ctx.error.lock().unwrap().clone();
            if let Some(complete) = &on_pipeline_complete {
                let summary = PipelineSummary {
                    items_emitted: emitted,
                    error: error.clone(),
                };
                crate::guard::guard("onPipelineComplete", complete(summary)).await;
            }
            let _ = terminal_tx.send(error);
        });

        let stream = futures::stream::unfold(item_rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed();

        (stream, terminal_rx)
    }
}
