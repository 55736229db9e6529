//! Dispatch pipeline — routes one operation through the applicable plugins.
//!
//! For each call:
//! - Plugins that do not support the operation, or whose `should_execute`
//!   returns false, are skipped.
//! - The rest are ordered by priority (descending, `MEDIUM` when undeclared),
//!   ties in registration order.
//! - Every `PreProcessor` rewrites the arguments in that order, then the
//!   first plugin executes (batch/select fast paths when it has them), then
//!   every `PostProcessor` rewrites the result in the same order.
//!
//! A failing or panicking stage ends the call with an unsuccessful
//! [`OperationResult`]; it never surfaces as an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{Instrument, debug, warn};

use crate::api::context::OperationContext;
use crate::error::{PluginError, PluginResult};
use crate::loader::module::PluginInstance;
use crate::operation::{OperationArgs, OperationResult, Priority, S3Operation};
use crate::registry::PluginRegistry;
use crate::traits::{BoxByteStream, effective_priority};

/// A plugin selected for one dispatch.
#[derive(Debug, Clone)]
struct Handler {
    /// The instance.
    instance: Arc<PluginInstance>,
    /// Metadata name, for logs and failures.
    name: String,
    /// Priority observed for this call.
    priority: Priority,
    /// Registration sequence number.
    seq: u64,
}

/// Why a pipeline stopped early.
#[derive(Debug)]
enum StageFailure {
    /// The caller cancelled the context between stages.
    Cancelled,
    /// A stage returned an error or panicked.
    Failed {
        /// Plugin that failed.
        plugin: String,
        /// Stage name.
        stage: &'static str,
        /// Failure description.
        error: String,
    },
}

impl StageFailure {
    fn into_result(self) -> OperationResult {
        match self {
            Self::Cancelled => OperationResult::failure("operation cancelled", "operation cancelled"),
            Self::Failed {
                plugin,
                stage,
                error,
            } => OperationResult::failure(
                format!("{stage} failed in plugin '{plugin}'"),
                error,
            ),
        }
    }
}

impl PluginRegistry {
    /// Dispatches one operation. Always returns a result; an operation
    /// nobody handles yields [`OperationResult::no_handler`].
    pub async fn dispatch(&self, ctx: &OperationContext, args: OperationArgs) -> OperationResult {
        let started = Instant::now();
        let handlers = self.select_handlers(ctx, &args).await;

        if handlers.is_empty() {
            debug!(operation = %ctx.operation, "No plugin handles operation");
            return OperationResult::no_handler();
        }

        debug!(
            operation = %ctx.operation,
            handler_count = handlers.len(),
            primary = %handlers[0].name,
            "Dispatching operation"
        );

        let outcome = run_pipeline(ctx, args, &handlers)
            .instrument(ctx.span.clone())
            .await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(failure) => {
                warn!(operation = %ctx.operation, failure = ?failure, "Dispatch aborted");
                failure.into_result()
            }
        };

        if result.duration.is_zero() {
            result.duration = started.elapsed();
        }
        result
    }

    /// Threads `stream` through every applicable `StreamProcessor` in
    /// dispatch order.
    pub async fn wrap_stream(
        &self,
        ctx: &OperationContext,
        stream: BoxByteStream,
    ) -> PluginResult<BoxByteStream> {
        let handlers = self.select_handlers(ctx, &OperationArgs::new()).await;
        let mut stream = stream;

        for handler in &handlers {
            if ctx.is_cancelled() {
                return Err(PluginError::Cancelled);
            }
            if let Some(processor) = handler.instance.as_stream_processor() {
                stream = processor
                    .process_stream(ctx, stream)
                    .instrument(ctx.span.clone())
                    .await?;
            }
        }

        Ok(stream)
    }

    /// Applicable plugins for this call, in execution order. A plugin that
    /// panics while being evaluated is left out of the call.
    async fn select_handlers(&self, ctx: &OperationContext, args: &OperationArgs) -> Vec<Handler> {
        let mut handlers: Vec<Handler> = self
            .snapshot()
            .await
            .into_iter()
            .filter_map(|entry| {
                let evaluated = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    let instance = &entry.instance;
                    let applies = instance.supports(ctx.operation)
                        && instance
                            .as_conditional()
                            .map(|c| c.should_execute(ctx, args))
                            .unwrap_or(true);
                    applies.then(|| effective_priority(instance.plugin()))
                }));

                match evaluated {
                    Ok(Some(priority)) => Some(Handler {
                        name: entry.name,
                        priority,
                        seq: entry.seq,
                        instance: entry.instance,
                    }),
                    Ok(None) => None,
                    Err(_) => {
                        warn!(
                            plugin = %entry.name,
                            operation = %ctx.operation,
                            "Plugin panicked during handler selection, skipping"
                        );
                        None
                    }
                }
            })
            .collect();

        handlers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        handlers
    }
}

/// Runs pre-process → primary → post-process.
async fn run_pipeline(
    ctx: &OperationContext,
    args: OperationArgs,
    handlers: &[Handler],
) -> Result<OperationResult, StageFailure> {
    let mut args = args;
    for handler in handlers {
        if let Some(pre) = handler.instance.as_pre_processor() {
            args = run_stage(ctx, &handler.name, "pre_process", pre.pre_process(ctx, args)).await?;
        }
    }

    let primary = &handlers[0];
    let plugin = primary.instance.plugin();
    let mut result = match (
        ctx.operation,
        plugin.as_batch_processor(),
        plugin.as_select_processor(),
    ) {
        (S3Operation::Batch, Some(batch), _) => {
            let items = batch_items(&args);
            run_stage(ctx, &primary.name, "process_batch", batch.process_batch(ctx, items)).await?
        }
        (S3Operation::Select, _, Some(select)) => {
            let (query, format) = select_query(&args);
            run_stage(
                ctx,
                &primary.name,
                "process_select",
                select.process_select(ctx, &query, &format),
            )
            .await?
        }
        _ => run_stage(ctx, &primary.name, "execute", plugin.execute(ctx, &args)).await?,
    };

    for handler in handlers {
        if let Some(post) = handler.instance.as_post_processor() {
            result =
                run_stage(ctx, &handler.name, "post_process", post.post_process(ctx, result))
                    .await?;
        }
    }

    Ok(result)
}

/// Runs one stage, turning errors and panics into a [`StageFailure`].
async fn run_stage<T, F>(
    ctx: &OperationContext,
    plugin: &str,
    stage: &'static str,
    fut: F,
) -> Result<T, StageFailure>
where
    F: std::future::Future<Output = PluginResult<T>>,
{
    if ctx.is_cancelled() {
        return Err(StageFailure::Cancelled);
    }

    debug!(plugin = %plugin, stage, "Running stage");

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StageFailure::Failed {
            plugin: plugin.to_string(),
            stage,
            error: e.to_string(),
        }),
        Err(_) => Err(StageFailure::Failed {
            plugin: plugin.to_string(),
            stage,
            error: "plugin panicked".to_string(),
        }),
    }
}

/// Batch items from `args["items"]`.
fn batch_items(args: &OperationArgs) -> Vec<serde_json::Value> {
    args.get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Query and output format from `args["query"]` / `args["format"]`.
fn select_query(args: &OperationArgs) -> (String, String) {
    let query = args
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let format = args
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("json")
        .to_string();
    (query, format)
}
