//! Integration tests for the dispatch pipeline.

mod helpers;

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use helpers::{EventLog, PluginSpec, TestPlugin, spec};
use s3view_plugin::prelude::*;
use s3view_plugin::PluginRegistry;

struct Harness {
    registry: PluginRegistry,
    events: EventLog,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: PluginRegistry::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn register(&self, spec: PluginSpec) {
        self.registry
            .register_plugin(TestPlugin::boxed(spec, &self.events))
            .await
            .unwrap();
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

fn upload() -> OperationContext {
    OperationContext::new(S3Operation::Upload, "bucket", "photos/cat.jpg")
}

#[tokio::test]
async fn test_empty_registry_has_no_handler() {
    let harness = Harness::new();

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;

    assert!(!result.success);
    assert_eq!(result.message, "no handler");
}

#[tokio::test]
async fn test_unsupported_operation_is_skipped() {
    let harness = Harness::new();
    harness.register(spec("gzip")).await;

    let ctx = OperationContext::new(S3Operation::Download, "bucket", "a.gz");
    let result = harness.registry.dispatch(&ctx, OperationArgs::new()).await;

    assert_eq!(result.message, "no handler");
    assert!(harness.events().is_empty());
}

#[tokio::test]
async fn test_pre_process_runs_in_priority_order() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            priority: Some(25),
            pre_process: true,
            ..spec("low")
        })
        .await;
    harness
        .register(PluginSpec {
            priority: Some(75),
            pre_process: true,
            ..spec("high")
        })
        .await;

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;

    assert!(result.success);
    // Highest priority is the primary and sees both rewrites.
    assert_eq!(result.message, "high");
    assert_eq!(result.data["trace"], json!(["high", "low"]));
    assert_eq!(
        harness.events(),
        vec!["high:pre_process", "low:pre_process", "high:execute"]
    );
}

#[tokio::test]
async fn test_equal_priority_keeps_registration_order() {
    let harness = Harness::new();
    harness.register(spec("first")).await;
    harness.register(spec("second")).await;
    harness
        .register(PluginSpec {
            priority: Some(Priority::MEDIUM.0),
            ..spec("third")
        })
        .await;

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;

    assert_eq!(result.message, "first");
}

#[tokio::test]
async fn test_post_process_rewrites_result() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            priority: Some(Priority::HIGH.0),
            post_process: true,
            ..spec("primary")
        })
        .await;
    harness
        .register(PluginSpec {
            post_process: true,
            ..spec("audit")
        })
        .await;

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;

    assert!(result.success);
    assert_eq!(result.metadata.get("post.primary"), Some(&json!(true)));
    assert_eq!(result.metadata.get("post.audit"), Some(&json!(true)));
    assert_eq!(
        harness.events(),
        vec!["primary:execute", "primary:post_process", "audit:post_process"]
    );
}

#[tokio::test]
async fn test_conditional_batch_plugin_respects_threshold() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            operations: vec![S3Operation::Batch],
            batch: true,
            min_batch_items: Some(1000),
            ..spec("bulk")
        })
        .await;

    let ctx = OperationContext::new(S3Operation::Batch, "bucket", "");
    let small = operation_args! { "items" => json!(vec![0; 10]) };
    let result = harness.registry.dispatch(&ctx, small).await;
    assert_eq!(result.message, "no handler");

    let large = operation_args! { "items" => json!(vec![0; 1000]) };
    let result = harness.registry.dispatch(&ctx, large).await;
    assert!(result.success);
    assert_eq!(result.message, "batch of 1000");
    assert_eq!(harness.events(), vec!["bulk:process_batch"]);
}

#[tokio::test]
async fn test_select_uses_query_fast_path() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            operations: vec![S3Operation::Select],
            select: true,
            ..spec("sql")
        })
        .await;

    let ctx = OperationContext::new(S3Operation::Select, "bucket", "data.csv");
    let args = operation_args! {
        "query" => json!("SELECT * FROM s3object"),
        "format" => json!("csv"),
    };
    let result = harness.registry.dispatch(&ctx, args).await;
    assert_eq!(result.message, "SELECT * FROM s3object as csv");

    let result = harness
        .registry
        .dispatch(&ctx, operation_args! { "query" => json!("SELECT 1") })
        .await;
    assert_eq!(result.message, "SELECT 1 as json");
}

#[tokio::test]
async fn test_batch_without_fast_path_executes() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            operations: vec![S3Operation::Batch],
            ..spec("plain")
        })
        .await;

    let ctx = OperationContext::new(S3Operation::Batch, "bucket", "");
    let result = harness.registry.dispatch(&ctx, OperationArgs::new()).await;

    assert_eq!(result.message, "plain");
    assert_eq!(harness.events(), vec!["plain:execute"]);
}

#[tokio::test]
async fn test_panicking_plugin_yields_failure_result() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            panic_on_execute: true,
            ..spec("crashy")
        })
        .await;

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;

    assert!(!result.success);
    assert_eq!(result.message, "execute failed in plugin 'crashy'");
    assert_eq!(result.error.as_deref(), Some("plugin panicked"));

    // The registry is still usable afterwards.
    assert!(harness.registry.contains("crashy").await);
}

#[tokio::test]
async fn test_panicking_predicate_excludes_plugin() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            priority: Some(Priority::HIGHEST.0),
            panic_on_should_execute: true,
            ..spec("broken")
        })
        .await;
    harness.register(spec("fallback")).await;

    let registry = Arc::new(harness.registry);
    let task = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.dispatch(&upload(), OperationArgs::new()).await })
    };
    let result = task.await.expect("dispatch must not panic");

    assert!(result.success);
    assert_eq!(result.message, "fallback");
    assert!(registry.contains("broken").await);
}

#[tokio::test]
async fn test_panicking_predicate_alone_yields_no_handler() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            panic_on_should_execute: true,
            ..spec("broken")
        })
        .await;

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;

    assert!(!result.success);
    assert_eq!(result.message, "no handler");
}

#[tokio::test]
async fn test_failing_pre_process_aborts_pipeline() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            priority: Some(Priority::HIGHEST.0),
            fail_pre_process: true,
            ..spec("quota")
        })
        .await;
    harness
        .register(PluginSpec {
            pre_process: true,
            ..spec("later")
        })
        .await;

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;

    assert!(!result.success);
    assert_eq!(result.message, "pre_process failed in plugin 'quota'");
    assert_eq!(result.error.as_deref(), Some("quota exceeded"));
    assert_eq!(harness.events(), vec!["quota:pre_process"]);
}

#[tokio::test]
async fn test_cancelled_context_short_circuits() {
    let harness = Harness::new();
    harness.register(spec("gzip")).await;

    let scope = CancellationToken::new();
    scope.cancel();
    let ctx = upload().with_cancellation(scope);
    let result = harness.registry.dispatch(&ctx, OperationArgs::new()).await;

    assert!(!result.success);
    assert_eq!(result.message, "operation cancelled");
    assert!(harness.events().is_empty());
}

#[tokio::test]
async fn test_capabilities_follow_replacement() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            pre_process: true,
            ..spec("gzip")
        })
        .await;
    harness.registry.dispatch(&upload(), OperationArgs::new()).await;
    assert_eq!(harness.events(), vec!["gzip:pre_process", "gzip:execute"]);

    harness.clear();
    harness
        .register(PluginSpec {
            version: "2.0.0".to_string(),
            ..spec("gzip")
        })
        .await;
    harness.registry.dispatch(&upload(), OperationArgs::new()).await;
    assert_eq!(harness.events(), vec!["gzip:execute"]);
}

#[tokio::test]
async fn test_dispatch_records_duration() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            execute_delay_ms: 20,
            ..spec("slow")
        })
        .await;

    let result = harness.registry.dispatch(&upload(), OperationArgs::new()).await;
    assert!(result.duration.as_millis() >= 20);
}

#[tokio::test]
async fn test_wrap_stream_threads_every_stream_processor() {
    let harness = Harness::new();
    harness
        .register(PluginSpec {
            stream: true,
            ..spec("checksum")
        })
        .await;
    harness
        .register(PluginSpec {
            priority: Some(Priority::HIGH.0),
            stream: true,
            ..spec("encrypt")
        })
        .await;
    harness.register(spec("plain")).await;

    let (client, server) = tokio::io::duplex(64);
    let mut wrapped = harness
        .registry
        .wrap_stream(&upload(), Box::new(client))
        .await
        .unwrap();

    assert_eq!(
        harness.events(),
        vec!["encrypt:process_stream", "checksum:process_stream"]
    );

    wrapped.write_all(b"hello").await.unwrap();
    let mut server = server;
    let mut buf = [0u8; 5];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}
